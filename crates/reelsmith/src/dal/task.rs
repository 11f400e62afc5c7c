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

//! Task Data Access Layer
//!
//! Submission, lookups and statistics live here. Worker-side operations
//! (claiming, heartbeats, completion) are in [`claiming`], and administrative
//! transitions (retry, cancel, orphan recovery) are in [`state`].

mod claiming;
mod state;

pub use state::TransitionOutcome;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use std::collections::BTreeMap;

use super::generation_status::{apply_transition, CounterTransition};
use super::models::{now, tasks_from_rows, to_utc, NewTaskRow, TaskRow};
use super::DAL;
use crate::database::schema::tasks;
use crate::error::StoreError;
use crate::models::task::{QueueStats, Task, TaskStatus};

/// A task about to be submitted.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: String,
    pub account_id: i64,
    pub payload: serde_json::Value,
}

/// Data access layer for task records.
#[derive(Clone)]
pub struct TaskDAL<'a> {
    dal: &'a DAL,
}

impl<'a> TaskDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Inserts tasks as Pending and moves them to Queued in one transaction.
    ///
    /// When `generation_status_id` is set, the batch's queued counter is
    /// raised by the number of tasks inside the same transaction. A missing
    /// batch rolls the whole submission back with `NotFound`.
    pub async fn create_queued(
        &self,
        generation_status_id: Option<String>,
        new_tasks: Vec<NewTask>,
    ) -> Result<Vec<Task>, StoreError> {
        use diesel::connection::Connection;

        let ts = now();
        let rows = new_tasks
            .into_iter()
            .map(|task| {
                Ok(NewTaskRow {
                    id: task.id,
                    account_id: task.account_id,
                    generation_status_id: generation_status_id.clone(),
                    payload: serde_json::to_string(&task.payload)?,
                    status: TaskStatus::Pending.as_str().to_string(),
                    retry_count: 0,
                    created_at: ts,
                    updated_at: ts,
                })
            })
            .collect::<Result<Vec<_>, serde_json::Error>>()?;

        let conn = self.dal.database.get_connection().await?;
        let created: Vec<TaskRow> = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();

                    for row in &rows {
                        diesel::insert_into(tasks::table).values(row).execute(conn)?;
                    }

                    diesel::update(tasks::table.filter(tasks::id.eq_any(&ids)))
                        .filter(tasks::status.eq(TaskStatus::Pending.as_str()))
                        .set((
                            tasks::status.eq(TaskStatus::Queued.as_str()),
                            tasks::queued_at.eq(Some(ts)),
                            tasks::updated_at.eq(ts),
                        ))
                        .execute(conn)?;

                    if let Some(status_id) = &generation_status_id {
                        let count = ids.len() as i32;
                        if count > 0
                            && apply_transition(conn, status_id, CounterTransition::Queued(count))?
                                == 0
                        {
                            return Err(diesel::result::Error::NotFound);
                        }
                    }

                    let mut created: Vec<TaskRow> = tasks::table
                        .filter(tasks::id.eq_any(&ids))
                        .select(TaskRow::as_select())
                        .load(conn)?;
                    // keep submission order
                    created.sort_by_key(|row| ids.iter().position(|id| *id == row.id));
                    Ok(created)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        tasks_from_rows(created)
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let task_id = task_id.to_string();
        let row: Option<TaskRow> = conn
            .interact(move |conn| {
                tasks::table
                    .find(task_id)
                    .select(TaskRow::as_select())
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(Task::try_from).transpose()
    }

    /// Tasks for an account, newest first.
    pub async fn list_by_account(
        &self,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Task>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let rows: Vec<TaskRow> = conn
            .interact(move |conn| {
                tasks::table
                    .filter(tasks::account_id.eq(account_id))
                    .order((tasks::created_at.desc(), tasks::id.desc()))
                    .limit(limit)
                    .offset(offset)
                    .select(TaskRow::as_select())
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        tasks_from_rows(rows)
    }

    /// Tasks belonging to a generation batch, oldest first.
    pub async fn list_by_generation(&self, status_id: &str) -> Result<Vec<Task>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let status_id = status_id.to_string();
        let rows: Vec<TaskRow> = conn
            .interact(move |conn| {
                tasks::table
                    .filter(tasks::generation_status_id.eq(status_id))
                    .order((tasks::created_at.asc(), tasks::id.asc()))
                    .select(TaskRow::as_select())
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        tasks_from_rows(rows)
    }

    /// Processing tasks whose heartbeat is older than `stale_before` or missing.
    pub async fn find_orphaned(&self, stale_before: NaiveDateTime) -> Result<Vec<Task>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let rows: Vec<TaskRow> = conn
            .interact(move |conn| {
                tasks::table
                    .filter(tasks::status.eq(TaskStatus::Processing.as_str()))
                    .filter(
                        tasks::last_heartbeat_at
                            .is_null()
                            .or(tasks::last_heartbeat_at.lt(stale_before)),
                    )
                    .order(tasks::started_at.asc())
                    .select(TaskRow::as_select())
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        tasks_from_rows(rows)
    }

    /// Processing tasks that started before `started_before`, regardless of heartbeat.
    pub async fn find_expired(&self, started_before: NaiveDateTime) -> Result<Vec<Task>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let rows: Vec<TaskRow> = conn
            .interact(move |conn| {
                tasks::table
                    .filter(tasks::status.eq(TaskStatus::Processing.as_str()))
                    .filter(tasks::started_at.lt(started_before))
                    .order(tasks::started_at.asc())
                    .select(TaskRow::as_select())
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        tasks_from_rows(rows)
    }

    /// Failed tasks whose failure happened at or after `since`.
    pub async fn count_failed_since(&self, since: NaiveDateTime) -> Result<i64, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let count = conn
            .interact(move |conn| {
                tasks::table
                    .filter(tasks::status.eq(TaskStatus::Failed.as_str()))
                    .filter(tasks::failed_at.ge(since))
                    .count()
                    .get_result::<i64>(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(count)
    }

    /// Status counts plus timing averages for tasks completed since `since`.
    pub async fn stats(&self, since: NaiveDateTime) -> Result<QueueStats, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let (grouped, timings, failed_since) = conn
            .interact(move |conn| {
                let grouped: Vec<(String, i64)> = tasks::table
                    .group_by(tasks::status)
                    .select((tasks::status, diesel::dsl::count_star()))
                    .load(conn)?;

                let timings: Vec<(i64, i64)> = tasks::table
                    .filter(tasks::status.eq(TaskStatus::Completed.as_str()))
                    .filter(tasks::completed_at.ge(since))
                    .select((tasks::processing_time_ms, tasks::queue_time_ms))
                    .load(conn)?;

                let failed_since: i64 = tasks::table
                    .filter(tasks::status.eq(TaskStatus::Failed.as_str()))
                    .filter(tasks::failed_at.ge(since))
                    .count()
                    .get_result(conn)?;

                Ok::<_, diesel::result::Error>((grouped, timings, failed_since))
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        let mut counts: BTreeMap<TaskStatus, i64> =
            TaskStatus::ALL.iter().map(|status| (*status, 0)).collect();
        for (status, count) in grouped {
            let status = TaskStatus::from_str(&status).ok_or_else(|| StoreError::InvalidRecord {
                table: "tasks",
                message: format!("unknown status '{}' in statistics", status),
            })?;
            counts.insert(status, count);
        }

        let completed_since = timings.len() as i64;
        let (avg_processing_time_ms, avg_queue_time_ms) = if timings.is_empty() {
            (None, None)
        } else {
            let n = timings.len() as f64;
            let processing: i64 = timings.iter().map(|(p, _)| p).sum();
            let queued: i64 = timings.iter().map(|(_, q)| q).sum();
            (Some(processing as f64 / n), Some(queued as f64 / n))
        };

        Ok(QueueStats {
            counts,
            avg_processing_time_ms,
            avg_queue_time_ms,
            completed_since,
            failed_since,
            window_start: to_utc(since),
        })
    }

    /// Overwrites timing columns directly. Used by maintenance tooling and
    /// tests that need to simulate a silent or long-running worker.
    pub async fn backdate(
        &self,
        task_id: &str,
        started_at: Option<NaiveDateTime>,
        last_heartbeat_at: Option<NaiveDateTime>,
    ) -> Result<bool, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let task_id = task_id.to_string();
        let updated = conn
            .interact(move |conn| {
                diesel::update(tasks::table.find(task_id))
                    .set((
                        tasks::started_at.eq(started_at),
                        tasks::last_heartbeat_at.eq(last_heartbeat_at),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(updated > 0)
    }
}
