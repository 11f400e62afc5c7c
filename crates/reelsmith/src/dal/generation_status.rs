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

//! Generation Status Data Access Layer
//!
//! Batch counters are only ever changed by single `UPDATE` statements built
//! from a [`CounterTransition`]. Decrements are conditional (`CASE WHEN x > 0`)
//! so a duplicated callback can never drive a counter negative, and every
//! transition moves exactly one unit between counters so their sum stays
//! equal to the number of submitted units.

use diesel::prelude::*;
use diesel::sql_types::{Text, Timestamp};
use diesel::SqliteConnection;
use uuid::Uuid;

use super::models::{now, GenerationStatusRow};
use super::DAL;
use crate::database::schema::{generation_locks, generation_statuses, tasks};
use crate::error::StoreError;
use crate::models::generation_status::{GenerationState, GenerationStatus};
use crate::models::task::TaskStatus;

const ACTIVE_STATES: [&str; 2] = ["Queuing", "Processing"];

const DEC_QUEUED: &str =
    "total_queued = CASE WHEN total_queued > 0 THEN total_queued - 1 ELSE 0 END";
const DEC_PROCESSING: &str =
    "total_processing = CASE WHEN total_processing > 0 THEN total_processing - 1 ELSE 0 END";
const DEC_FAILED: &str =
    "total_failed = CASE WHEN total_failed > 0 THEN total_failed - 1 ELSE 0 END";

/// A movement of units between a batch's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterTransition {
    /// New units submitted to the batch.
    Queued(i32),
    /// A worker claimed a unit; the first claim moves the batch to Processing.
    Processing,
    /// A running unit finished successfully.
    Completed,
    /// A running unit failed with no retries left.
    Failed,
    /// A running unit went back to the queue (backoff retry or orphan recovery).
    Requeued,
    /// A failed unit was retried by hand; reopens a settled batch.
    RetriedFromFailed,
    /// A waiting unit was cancelled and counts as failed.
    Canceled,
}

impl CounterTransition {
    fn set_clause(&self) -> String {
        match self {
            CounterTransition::Queued(count) => {
                format!("total_queued = total_queued + {}", count)
            }
            CounterTransition::Processing => format!(
                "{}, total_processing = total_processing + 1, \
                 status = CASE WHEN status = 'Queuing' THEN 'Processing' ELSE status END",
                DEC_QUEUED
            ),
            CounterTransition::Completed => format!(
                "{}, total_completed = total_completed + 1",
                DEC_PROCESSING
            ),
            CounterTransition::Failed => {
                format!("{}, total_failed = total_failed + 1", DEC_PROCESSING)
            }
            CounterTransition::Requeued => {
                format!("{}, total_queued = total_queued + 1", DEC_PROCESSING)
            }
            CounterTransition::RetriedFromFailed => format!(
                "{}, total_queued = total_queued + 1, \
                 status = CASE WHEN status IN ('Completed', 'Failed') THEN 'Processing' ELSE status END, \
                 completed_at = CASE WHEN status IN ('Completed', 'Failed') THEN NULL ELSE completed_at END",
                DEC_FAILED
            ),
            CounterTransition::Canceled => {
                format!("{}, total_failed = total_failed + 1", DEC_QUEUED)
            }
        }
    }
}

/// Applies a counter transition on an existing connection.
///
/// Used inside task transactions so a task's status change and its batch
/// counters commit together. Returns the number of rows updated.
pub(crate) fn apply_transition(
    conn: &mut SqliteConnection,
    status_id: &str,
    transition: CounterTransition,
) -> Result<usize, diesel::result::Error> {
    let query = format!(
        "UPDATE generation_statuses SET {}, updated_at = ? WHERE id = ?",
        transition.set_clause()
    );
    diesel::sql_query(query)
        .bind::<Timestamp, _>(now())
        .bind::<Text, _>(status_id)
        .execute(conn)
}

/// Finalizes a drained, still-active batch and releases its lock.
///
/// The conditional update lets exactly one caller win when several units
/// finish at once. Returns the settled row when this call performed the
/// transition.
pub(crate) fn settle_batch(
    conn: &mut SqliteConnection,
    status_id: &str,
) -> Result<Option<GenerationStatusRow>, diesel::result::Error> {
    let ts = now();
    let updated = diesel::sql_query(
        "UPDATE generation_statuses \
         SET status = CASE WHEN total_completed = 0 AND total_failed > 0 THEN 'Failed' ELSE 'Completed' END, \
             completed_at = ?, updated_at = ? \
         WHERE id = ? AND status IN ('Queuing', 'Processing') \
           AND total_queued = 0 AND total_processing = 0",
    )
    .bind::<Timestamp, _>(ts)
    .bind::<Timestamp, _>(ts)
    .bind::<Text, _>(status_id)
    .execute(conn)?;

    if updated == 0 {
        return Ok(None);
    }

    let row: GenerationStatusRow = generation_statuses::table
        .find(status_id)
        .select(GenerationStatusRow::as_select())
        .first(conn)?;

    if let Some(lock_id) = &row.lock_id {
        diesel::delete(generation_locks::table.find(lock_id)).execute(conn)?;
    }

    Ok(Some(row))
}

/// Stops every outstanding unit of a batch that is being forced terminal.
///
/// Waiting units are cancelled and running units fail, so nothing from the
/// batch can run once it is terminal. A worker still rendering one of them
/// loses its claim. Both kinds move from their counter to `total_failed`.
/// Returns the number of tasks stopped.
pub(crate) fn drain_units(
    conn: &mut SqliteConnection,
    status_id: &str,
    reason: &str,
) -> Result<usize, diesel::result::Error> {
    let ts = now();
    let canceled = diesel::update(
        tasks::table
            .filter(tasks::generation_status_id.eq(status_id))
            .filter(tasks::status.eq_any([
                TaskStatus::Pending.as_str(),
                TaskStatus::Queued.as_str(),
            ])),
    )
    .set((
        tasks::status.eq(TaskStatus::Canceled.as_str()),
        tasks::canceled_at.eq(Some(ts)),
        tasks::error_message.eq(Some(reason)),
        tasks::updated_at.eq(ts),
    ))
    .execute(conn)?;

    let failed = diesel::update(
        tasks::table
            .filter(tasks::generation_status_id.eq(status_id))
            .filter(tasks::status.eq(TaskStatus::Processing.as_str())),
    )
    .set((
        tasks::status.eq(TaskStatus::Failed.as_str()),
        tasks::failed_at.eq(Some(ts)),
        tasks::error_message.eq(Some(reason)),
        tasks::updated_at.eq(ts),
    ))
    .execute(conn)?;

    // SET expressions read the pre-update row.
    diesel::sql_query(
        "UPDATE generation_statuses \
         SET total_failed = total_failed + total_queued + total_processing, \
             total_queued = 0, total_processing = 0, updated_at = ? \
         WHERE id = ?",
    )
    .bind::<Timestamp, _>(ts)
    .bind::<Text, _>(status_id)
    .execute(conn)?;

    Ok(canceled + failed)
}

/// Data access layer for generation status records.
#[derive(Clone)]
pub struct GenerationStatusDAL<'a> {
    dal: &'a DAL,
}

impl<'a> GenerationStatusDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Creates a new batch record in the Queuing state with zeroed counters.
    pub async fn create(
        &self,
        account_id: i64,
        content_type: &str,
        lock_id: Option<&str>,
    ) -> Result<GenerationStatus, StoreError> {
        let ts = now();
        let row = GenerationStatusRow {
            id: Uuid::new_v4().to_string(),
            account_id,
            content_type: content_type.to_string(),
            lock_id: lock_id.map(str::to_string),
            status: GenerationState::Queuing.as_str().to_string(),
            total_queued: 0,
            total_processing: 0,
            total_completed: 0,
            total_failed: 0,
            started_at: ts,
            completed_at: None,
            updated_at: ts,
        };

        let conn = self.dal.database.get_connection().await?;
        let inserted = row.clone();
        conn.interact(move |conn| {
            diesel::insert_into(generation_statuses::table)
                .values(&inserted)
                .execute(conn)
        })
        .await
        .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        GenerationStatus::try_from(row)
    }

    pub async fn get(&self, status_id: &str) -> Result<Option<GenerationStatus>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let status_id = status_id.to_string();
        let row: Option<GenerationStatusRow> = conn
            .interact(move |conn| {
                generation_statuses::table
                    .find(status_id)
                    .select(GenerationStatusRow::as_select())
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(GenerationStatus::try_from).transpose()
    }

    /// Most recent Queuing or Processing batch for the pair, if any.
    pub async fn find_active(
        &self,
        account_id: i64,
        content_type: &str,
    ) -> Result<Option<GenerationStatus>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let content_type = content_type.to_string();
        let row: Option<GenerationStatusRow> = conn
            .interact(move |conn| {
                generation_statuses::table
                    .filter(generation_statuses::account_id.eq(account_id))
                    .filter(generation_statuses::content_type.eq(content_type))
                    .filter(generation_statuses::status.eq_any(ACTIVE_STATES))
                    .order(generation_statuses::started_at.desc())
                    .select(GenerationStatusRow::as_select())
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(GenerationStatus::try_from).transpose()
    }

    /// Applies one counter transition. Returns false if the batch does not exist.
    pub async fn apply(
        &self,
        status_id: &str,
        transition: CounterTransition,
    ) -> Result<bool, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let status_id = status_id.to_string();
        let updated = conn
            .interact(move |conn| apply_transition(conn, &status_id, transition))
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(updated > 0)
    }

    /// Forces a batch into a terminal state, stopping its outstanding units
    /// in the same transaction.
    pub async fn set_terminal(
        &self,
        status_id: &str,
        state: GenerationState,
    ) -> Result<bool, StoreError> {
        use diesel::connection::Connection;

        let conn = self.dal.database.get_connection().await?;
        let status_id = status_id.to_string();
        let updated = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let reason = format!("Generation marked {}", state.as_str());
                    drain_units(conn, &status_id, &reason)?;
                    let ts = now();
                    diesel::update(generation_statuses::table.find(&status_id))
                        .set((
                            generation_statuses::status.eq(state.as_str()),
                            generation_statuses::completed_at.eq(Some(ts)),
                            generation_statuses::updated_at.eq(ts),
                        ))
                        .execute(conn)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(updated > 0)
    }

    /// Settles the batch if it has drained; see [`settle_batch`].
    pub async fn settle(&self, status_id: &str) -> Result<Option<GenerationStatus>, StoreError> {
        use diesel::connection::Connection;

        let conn = self.dal.database.get_connection().await?;
        let status_id = status_id.to_string();
        let row = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    settle_batch(conn, &status_id)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(GenerationStatus::try_from).transpose()
    }

    /// Forces active batches untouched since `stale_before` to Failed.
    ///
    /// Their outstanding units are stopped in the same transaction (see
    /// [`drain_units`]). The returned rows are the batches as they were found.
    pub async fn fail_stale(
        &self,
        stale_before: chrono::NaiveDateTime,
    ) -> Result<Vec<GenerationStatus>, StoreError> {
        use diesel::connection::Connection;

        let conn = self.dal.database.get_connection().await?;
        let rows: Vec<GenerationStatusRow> = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let stale: Vec<GenerationStatusRow> = generation_statuses::table
                        .filter(generation_statuses::status.eq_any(ACTIVE_STATES))
                        .filter(generation_statuses::updated_at.lt(stale_before))
                        .select(GenerationStatusRow::as_select())
                        .load(conn)?;

                    for row in &stale {
                        drain_units(conn, &row.id, "Generation stuck; failed on startup")?;
                        let ts = now();
                        diesel::update(generation_statuses::table.find(&row.id))
                            .filter(generation_statuses::status.eq_any(ACTIVE_STATES))
                            .set((
                                generation_statuses::status.eq(GenerationState::Failed.as_str()),
                                generation_statuses::completed_at.eq(Some(ts)),
                                generation_statuses::updated_at.eq(ts),
                            ))
                            .execute(conn)?;
                    }

                    Ok(stale)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        rows.into_iter().map(GenerationStatus::try_from).collect()
    }

    /// Sets `updated_at` directly. Used by maintenance tooling and tests that
    /// need to simulate an idle batch.
    pub async fn touch(
        &self,
        status_id: &str,
        updated_at: chrono::NaiveDateTime,
    ) -> Result<bool, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let status_id = status_id.to_string();
        let updated = conn
            .interact(move |conn| {
                diesel::update(generation_statuses::table.find(status_id))
                    .set(generation_statuses::updated_at.eq(updated_at))
                    .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(updated > 0)
    }
}
