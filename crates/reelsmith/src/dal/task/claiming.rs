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

//! Worker-side task operations: claiming, heartbeats and result reporting.
//!
//! Every write after the claim is conditional on the task still being
//! Processing under the same worker id. If recovery has handed the task to
//! someone else in the meantime, the write matches no row and the caller gets
//! `None` back instead of clobbering the new owner's state.

use chrono::NaiveDateTime;
use diesel::prelude::*;

use super::TaskDAL;
use crate::dal::generation_status::{apply_transition, CounterTransition};
use crate::dal::models::{now, TaskRow};
use crate::database::schema::tasks;
use crate::error::StoreError;
use crate::models::task::{Task, TaskStatus};

impl<'a> TaskDAL<'a> {
    /// Atomically claims the oldest Queued task whose retry time has passed.
    ///
    /// Sets the worker id, `started_at`, an initial heartbeat and the queue
    /// wait, and moves one unit of the task's batch from queued to
    /// processing.
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<Task>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let worker_id = worker_id.to_string();

        // IMMEDIATE takes the write lock up front so two processes sharing the
        // file cannot select the same row between SELECT and UPDATE.
        let claimed: Option<TaskRow> = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
                    let ts = now();

                    let candidate: Option<TaskRow> = tasks::table
                        .filter(tasks::status.eq(TaskStatus::Queued.as_str()))
                        .filter(tasks::retry_at.is_null().or(tasks::retry_at.le(ts)))
                        .order((tasks::queued_at.asc(), tasks::created_at.asc()))
                        .select(TaskRow::as_select())
                        .first(conn)
                        .optional()?;

                    let Some(row) = candidate else {
                        return Ok(None);
                    };

                    let queue_time_ms = row
                        .queued_at
                        .map(|queued| (ts - queued).num_milliseconds().max(0))
                        .unwrap_or(0);

                    diesel::update(tasks::table.find(&row.id))
                        .filter(tasks::status.eq(TaskStatus::Queued.as_str()))
                        .set((
                            tasks::status.eq(TaskStatus::Processing.as_str()),
                            tasks::worker_id.eq(Some(&worker_id)),
                            tasks::started_at.eq(Some(ts)),
                            tasks::last_heartbeat_at.eq(Some(ts)),
                            tasks::queue_time_ms.eq(queue_time_ms),
                            tasks::retry_at.eq(None::<NaiveDateTime>),
                            tasks::updated_at.eq(ts),
                        ))
                        .execute(conn)?;

                    if let Some(status_id) = &row.generation_status_id {
                        apply_transition(conn, status_id, CounterTransition::Processing)?;
                    }

                    tasks::table
                        .find(&row.id)
                        .select(TaskRow::as_select())
                        .first(conn)
                        .optional()
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        claimed.map(Task::try_from).transpose()
    }

    /// Refreshes the heartbeat. Returns false if the worker no longer owns the task.
    pub async fn heartbeat(&self, task_id: &str, worker_id: &str) -> Result<bool, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let task_id = task_id.to_string();
        let worker_id = worker_id.to_string();
        let updated = conn
            .interact(move |conn| {
                let ts = now();
                diesel::update(tasks::table.find(task_id))
                    .filter(tasks::status.eq(TaskStatus::Processing.as_str()))
                    .filter(tasks::worker_id.eq(worker_id))
                    .set((
                        tasks::last_heartbeat_at.eq(Some(ts)),
                        tasks::updated_at.eq(ts),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(updated > 0)
    }

    /// Marks an owned task Completed and counts it on its batch.
    pub async fn complete_owned(
        &self,
        task_id: &str,
        worker_id: &str,
        processing_time_ms: i64,
    ) -> Result<Option<Task>, StoreError> {
        use diesel::connection::Connection;

        let conn = self.dal.database.get_connection().await?;
        let task_id = task_id.to_string();
        let worker_id = worker_id.to_string();
        let row: Option<TaskRow> = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let ts = now();
                    let updated = diesel::update(tasks::table.find(&task_id))
                        .filter(tasks::status.eq(TaskStatus::Processing.as_str()))
                        .filter(tasks::worker_id.eq(&worker_id))
                        .set((
                            tasks::status.eq(TaskStatus::Completed.as_str()),
                            tasks::completed_at.eq(Some(ts)),
                            tasks::processing_time_ms.eq(processing_time_ms),
                            tasks::error_message.eq(None::<String>),
                            tasks::updated_at.eq(ts),
                        ))
                        .execute(conn)?;

                    owned_result(conn, &task_id, updated, CounterTransition::Completed)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(Task::try_from).transpose()
    }

    /// Puts an owned task back in the queue with a retry time.
    pub async fn requeue_owned(
        &self,
        task_id: &str,
        worker_id: &str,
        error_message: &str,
        retry_at: NaiveDateTime,
    ) -> Result<Option<Task>, StoreError> {
        use diesel::connection::Connection;

        let conn = self.dal.database.get_connection().await?;
        let task_id = task_id.to_string();
        let worker_id = worker_id.to_string();
        let error_message = error_message.to_string();
        let row: Option<TaskRow> = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let ts = now();
                    let updated = diesel::update(tasks::table.find(&task_id))
                        .filter(tasks::status.eq(TaskStatus::Processing.as_str()))
                        .filter(tasks::worker_id.eq(&worker_id))
                        .set((
                            tasks::status.eq(TaskStatus::Queued.as_str()),
                            tasks::retry_count.eq(tasks::retry_count + 1),
                            tasks::retry_at.eq(Some(retry_at)),
                            tasks::queued_at.eq(Some(ts)),
                            tasks::worker_id.eq(None::<String>),
                            tasks::last_heartbeat_at.eq(None::<NaiveDateTime>),
                            tasks::error_message.eq(Some(&error_message)),
                            tasks::updated_at.eq(ts),
                        ))
                        .execute(conn)?;

                    owned_result(conn, &task_id, updated, CounterTransition::Requeued)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(Task::try_from).transpose()
    }

    /// Marks an owned task Failed and counts it on its batch.
    pub async fn fail_owned(
        &self,
        task_id: &str,
        worker_id: &str,
        error_message: &str,
        processing_time_ms: i64,
    ) -> Result<Option<Task>, StoreError> {
        use diesel::connection::Connection;

        let conn = self.dal.database.get_connection().await?;
        let task_id = task_id.to_string();
        let worker_id = worker_id.to_string();
        let error_message = error_message.to_string();
        let row: Option<TaskRow> = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let ts = now();
                    let updated = diesel::update(tasks::table.find(&task_id))
                        .filter(tasks::status.eq(TaskStatus::Processing.as_str()))
                        .filter(tasks::worker_id.eq(&worker_id))
                        .set((
                            tasks::status.eq(TaskStatus::Failed.as_str()),
                            tasks::failed_at.eq(Some(ts)),
                            tasks::processing_time_ms.eq(processing_time_ms),
                            tasks::error_message.eq(Some(&error_message)),
                            tasks::updated_at.eq(ts),
                        ))
                        .execute(conn)?;

                    owned_result(conn, &task_id, updated, CounterTransition::Failed)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(Task::try_from).transpose()
    }
}

/// Applies the batch transition for a successful owned update and reloads the task.
fn owned_result(
    conn: &mut diesel::SqliteConnection,
    task_id: &str,
    updated: usize,
    transition: CounterTransition,
) -> Result<Option<TaskRow>, diesel::result::Error> {
    if updated == 0 {
        return Ok(None);
    }

    let row: TaskRow = tasks::table
        .find(task_id)
        .select(TaskRow::as_select())
        .first(conn)?;

    if let Some(status_id) = &row.generation_status_id {
        apply_transition(conn, status_id, transition)?;
    }

    Ok(Some(row))
}
