/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Administrative task transitions: manual retry, cancel and orphan recovery.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::SqliteConnection;
use uuid::Uuid;

use super::TaskDAL;
use crate::dal::generation_status::{apply_transition, CounterTransition};
use crate::dal::models::{now, GenerationLockRow, GenerationStatusRow, TaskRow};
use crate::database::schema::{generation_locks, generation_statuses, tasks};
use crate::error::StoreError;
use crate::models::generation_status::GenerationState;
use crate::models::task::{Task, TaskStatus};

/// Result of a guarded status transition.
#[derive(Debug)]
pub enum TransitionOutcome {
    /// The transition happened; carries the updated task.
    Applied(Task),
    /// The task exists but its current status does not allow the transition.
    Rejected(TaskStatus),
    /// Reopening the task's settled batch needs the pair's lock, and another
    /// generation holds it.
    PairLocked {
        account_id: i64,
        content_type: String,
    },
    NotFound,
}

enum RawOutcome {
    Applied(TaskRow),
    Rejected(TaskRow),
    PairLocked(GenerationStatusRow),
    NotFound,
}

impl RawOutcome {
    fn into_outcome(self) -> Result<TransitionOutcome, StoreError> {
        Ok(match self {
            RawOutcome::Applied(row) => TransitionOutcome::Applied(Task::try_from(row)?),
            RawOutcome::Rejected(row) => TransitionOutcome::Rejected(row.task_status()?),
            RawOutcome::PairLocked(batch) => TransitionOutcome::PairLocked {
                account_id: batch.account_id,
                content_type: batch.content_type,
            },
            RawOutcome::NotFound => TransitionOutcome::NotFound,
        })
    }
}

fn load_row(conn: &mut SqliteConnection, task_id: &str) -> QueryResult<Option<TaskRow>> {
    tasks::table
        .find(task_id)
        .select(TaskRow::as_select())
        .first(conn)
        .optional()
}

/// Takes the pair's lock back for a terminal batch that is about to reopen.
///
/// Returns false when another generation holds the pair. A batch whose own
/// lock row still exists keeps it.
fn relock_batch(conn: &mut SqliteConnection, batch: &GenerationStatusRow) -> QueryResult<bool> {
    if let Some(lock_id) = &batch.lock_id {
        let held: i64 = generation_locks::table
            .find(lock_id)
            .count()
            .get_result(conn)?;
        if held > 0 {
            return Ok(true);
        }
    }

    let lock = GenerationLockRow {
        lock_id: Uuid::new_v4().to_string(),
        account_id: batch.account_id,
        content_type: batch.content_type.clone(),
        locked_at: now(),
    };
    let inserted = diesel::insert_into(generation_locks::table)
        .values(&lock)
        .on_conflict((generation_locks::account_id, generation_locks::content_type))
        .do_nothing()
        .execute(conn)?;
    if inserted == 0 {
        return Ok(false);
    }

    diesel::update(generation_statuses::table.find(&batch.id))
        .set(generation_statuses::lock_id.eq(Some(lock.lock_id.as_str())))
        .execute(conn)?;
    Ok(true)
}

impl<'a> TaskDAL<'a> {
    /// Failed -> Queued with `retry_count + 1`. The batch, if any, moves the
    /// unit from failed back to queued.
    ///
    /// A settled batch reopens only if the pair's lock can be taken back in
    /// the same transaction; otherwise nothing changes and the outcome is
    /// [`TransitionOutcome::PairLocked`].
    pub async fn retry_failed(&self, task_id: &str) -> Result<TransitionOutcome, StoreError> {
        use diesel::connection::Connection;

        let conn = self.dal.database.get_connection().await?;
        let task_id = task_id.to_string();
        let outcome = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let Some(current) = load_row(conn, &task_id)? else {
                        return Ok(RawOutcome::NotFound);
                    };
                    if current.status != TaskStatus::Failed.as_str() {
                        return Ok(RawOutcome::Rejected(current));
                    }

                    if let Some(status_id) = &current.generation_status_id {
                        let batch: Option<GenerationStatusRow> = generation_statuses::table
                            .find(status_id)
                            .select(GenerationStatusRow::as_select())
                            .first(conn)
                            .optional()?;
                        if let Some(batch) = batch {
                            let terminal = batch.status == GenerationState::Completed.as_str()
                                || batch.status == GenerationState::Failed.as_str();
                            if terminal && !relock_batch(conn, &batch)? {
                                return Ok(RawOutcome::PairLocked(batch));
                            }
                        }
                    }

                    let ts = now();
                    let updated = diesel::update(tasks::table.find(&task_id))
                        .filter(tasks::status.eq(TaskStatus::Failed.as_str()))
                        .set((
                            tasks::status.eq(TaskStatus::Queued.as_str()),
                            tasks::retry_count.eq(tasks::retry_count + 1),
                            tasks::queued_at.eq(Some(ts)),
                            tasks::retry_at.eq(None::<NaiveDateTime>),
                            tasks::worker_id.eq(None::<String>),
                            tasks::last_heartbeat_at.eq(None::<NaiveDateTime>),
                            tasks::updated_at.eq(ts),
                        ))
                        .execute(conn)?;

                    if updated == 0 {
                        return Ok(RawOutcome::Rejected(current));
                    }

                    if let Some(status_id) = &current.generation_status_id {
                        apply_transition(conn, status_id, CounterTransition::RetriedFromFailed)?;
                    }

                    Ok(match load_row(conn, &task_id)? {
                        Some(row) => RawOutcome::Applied(row),
                        None => RawOutcome::NotFound,
                    })
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        outcome.into_outcome()
    }

    /// Pending | Queued -> Canceled. A cancelled batch unit counts as failed.
    pub async fn cancel(&self, task_id: &str) -> Result<TransitionOutcome, StoreError> {
        use diesel::connection::Connection;

        let conn = self.dal.database.get_connection().await?;
        let task_id = task_id.to_string();
        let outcome = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let Some(current) = load_row(conn, &task_id)? else {
                        return Ok(RawOutcome::NotFound);
                    };

                    let ts = now();
                    let updated = diesel::update(tasks::table.find(&task_id))
                        .filter(tasks::status.eq_any([
                            TaskStatus::Pending.as_str(),
                            TaskStatus::Queued.as_str(),
                        ]))
                        .set((
                            tasks::status.eq(TaskStatus::Canceled.as_str()),
                            tasks::canceled_at.eq(Some(ts)),
                            tasks::updated_at.eq(ts),
                        ))
                        .execute(conn)?;

                    if updated == 0 {
                        return Ok(RawOutcome::Rejected(current));
                    }

                    if let Some(status_id) = &current.generation_status_id {
                        apply_transition(conn, status_id, CounterTransition::Canceled)?;
                    }

                    Ok(match load_row(conn, &task_id)? {
                        Some(row) => RawOutcome::Applied(row),
                        None => RawOutcome::NotFound,
                    })
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        outcome.into_outcome()
    }

    /// Processing -> Queued with `retry_count + 1`, clearing the claim.
    ///
    /// With `stale_before` set, the task is only requeued if its heartbeat is
    /// still missing or older than that instant, so a worker that heartbeated
    /// after the orphan scan keeps its task.
    pub async fn requeue_processing(
        &self,
        task_id: &str,
        stale_before: Option<NaiveDateTime>,
    ) -> Result<TransitionOutcome, StoreError> {
        self.recover_processing(task_id, stale_before, None).await
    }

    /// Processing -> Failed for a task whose worker vanished and whose retry
    /// budget is spent.
    pub async fn abandon_processing(
        &self,
        task_id: &str,
        stale_before: Option<NaiveDateTime>,
        error_message: &str,
    ) -> Result<TransitionOutcome, StoreError> {
        self.recover_processing(task_id, stale_before, Some(error_message.to_string()))
            .await
    }

    async fn recover_processing(
        &self,
        task_id: &str,
        stale_before: Option<NaiveDateTime>,
        abandon_with: Option<String>,
    ) -> Result<TransitionOutcome, StoreError> {
        use diesel::connection::Connection;

        let conn = self.dal.database.get_connection().await?;
        let task_id = task_id.to_string();
        let outcome = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let Some(current) = load_row(conn, &task_id)? else {
                        return Ok(RawOutcome::NotFound);
                    };

                    let still_stale = match stale_before {
                        Some(cutoff) => current
                            .last_heartbeat_at
                            .map_or(true, |heartbeat| heartbeat < cutoff),
                        None => true,
                    };
                    if current.status != TaskStatus::Processing.as_str() || !still_stale {
                        return Ok(RawOutcome::Rejected(current));
                    }

                    let ts = now();
                    let target = tasks::table
                        .find(&task_id)
                        .filter(tasks::status.eq(TaskStatus::Processing.as_str()));

                    let (updated, transition) = match &abandon_with {
                        Some(message) => (
                            diesel::update(target)
                                .set((
                                    tasks::status.eq(TaskStatus::Failed.as_str()),
                                    tasks::failed_at.eq(Some(ts)),
                                    tasks::error_message.eq(Some(message)),
                                    tasks::updated_at.eq(ts),
                                ))
                                .execute(conn)?,
                            CounterTransition::Failed,
                        ),
                        None => (
                            diesel::update(target)
                                .set((
                                    tasks::status.eq(TaskStatus::Queued.as_str()),
                                    tasks::retry_count.eq(tasks::retry_count + 1),
                                    tasks::queued_at.eq(Some(ts)),
                                    tasks::retry_at.eq(None::<NaiveDateTime>),
                                    tasks::worker_id.eq(None::<String>),
                                    tasks::last_heartbeat_at.eq(None::<NaiveDateTime>),
                                    tasks::updated_at.eq(ts),
                                ))
                                .execute(conn)?,
                            CounterTransition::Requeued,
                        ),
                    };

                    if updated == 0 {
                        return Ok(RawOutcome::Rejected(current));
                    }

                    if let Some(status_id) = &current.generation_status_id {
                        apply_transition(conn, status_id, transition)?;
                    }

                    Ok(match load_row(conn, &task_id)? {
                        Some(row) => RawOutcome::Applied(row),
                        None => RawOutcome::NotFound,
                    })
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        outcome.into_outcome()
    }
}
