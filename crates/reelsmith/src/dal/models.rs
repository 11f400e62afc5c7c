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

//! Storage models
//!
//! Diesel row structs for the orchestration tables. Timestamps are stored as
//! naive UTC and statuses as text; both are converted to domain types at the
//! DAL boundary.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use diesel::prelude::*;

use crate::database::schema::{generation_locks, generation_statuses, sync_statuses, tasks};
use crate::error::StoreError;
use crate::models::generation_lock::GenerationLock;
use crate::models::generation_status::{GenerationState, GenerationStatus};
use crate::models::sync_status::{SyncState, SyncStatus};
use crate::models::task::{Task, TaskStatus};

/// Current time as stored in the database.
pub(crate) fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

pub(crate) fn to_utc(ts: NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&ts)
}

/// `now - age`, saturating to the minimum timestamp for absurd ages.
pub(crate) fn cutoff(age: std::time::Duration) -> NaiveDateTime {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now().checked_sub_signed(age))
        .unwrap_or(NaiveDateTime::MIN)
}

// ============================================================================
// Task Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskRow {
    pub id: String,
    pub account_id: i64,
    pub generation_status_id: Option<String>,
    pub payload: String,
    pub status: String,
    pub worker_id: Option<String>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub processing_time_ms: i64,
    pub queue_time_ms: i64,
    pub queued_at: Option<NaiveDateTime>,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub failed_at: Option<NaiveDateTime>,
    pub canceled_at: Option<NaiveDateTime>,
    pub last_heartbeat_at: Option<NaiveDateTime>,
    pub retry_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTaskRow {
    pub id: String,
    pub account_id: i64,
    pub generation_status_id: Option<String>,
    pub payload: String,
    pub status: String,
    pub retry_count: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl TaskRow {
    pub(crate) fn task_status(&self) -> Result<TaskStatus, StoreError> {
        TaskStatus::from_str(&self.status).ok_or_else(|| StoreError::InvalidRecord {
            table: "tasks",
            message: format!("unknown status '{}' on task {}", self.status, self.id),
        })
    }
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = row.task_status()?;
        let payload = serde_json::from_str(&row.payload)?;
        Ok(Task {
            id: row.id,
            account_id: row.account_id,
            generation_status_id: row.generation_status_id,
            payload,
            status,
            worker_id: row.worker_id,
            retry_count: row.retry_count,
            error_message: row.error_message,
            processing_time_ms: row.processing_time_ms,
            queue_time_ms: row.queue_time_ms,
            queued_at: row.queued_at.map(to_utc),
            started_at: row.started_at.map(to_utc),
            completed_at: row.completed_at.map(to_utc),
            failed_at: row.failed_at.map(to_utc),
            canceled_at: row.canceled_at.map(to_utc),
            last_heartbeat_at: row.last_heartbeat_at.map(to_utc),
            retry_at: row.retry_at.map(to_utc),
            created_at: to_utc(row.created_at),
            updated_at: to_utc(row.updated_at),
        })
    }
}

/// Converts a batch of rows, failing on the first invalid one.
pub(crate) fn tasks_from_rows(rows: Vec<TaskRow>) -> Result<Vec<Task>, StoreError> {
    rows.into_iter().map(Task::try_from).collect()
}

// ============================================================================
// Generation Lock Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = generation_locks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct GenerationLockRow {
    pub lock_id: String,
    pub account_id: i64,
    pub content_type: String,
    pub locked_at: NaiveDateTime,
}

impl From<GenerationLockRow> for GenerationLock {
    fn from(row: GenerationLockRow) -> Self {
        GenerationLock {
            lock_id: row.lock_id,
            account_id: row.account_id,
            content_type: row.content_type,
            locked_at: to_utc(row.locked_at),
        }
    }
}

// ============================================================================
// Generation Status Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = generation_statuses)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct GenerationStatusRow {
    pub id: String,
    pub account_id: i64,
    pub content_type: String,
    pub lock_id: Option<String>,
    pub status: String,
    pub total_queued: i32,
    pub total_processing: i32,
    pub total_completed: i32,
    pub total_failed: i32,
    pub started_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub updated_at: NaiveDateTime,
}

impl TryFrom<GenerationStatusRow> for GenerationStatus {
    type Error = StoreError;

    fn try_from(row: GenerationStatusRow) -> Result<Self, Self::Error> {
        let status =
            GenerationState::from_str(&row.status).ok_or_else(|| StoreError::InvalidRecord {
                table: "generation_statuses",
                message: format!("unknown status '{}' on batch {}", row.status, row.id),
            })?;
        Ok(GenerationStatus {
            id: row.id,
            account_id: row.account_id,
            content_type: row.content_type,
            lock_id: row.lock_id,
            status,
            total_queued: row.total_queued,
            total_processing: row.total_processing,
            total_completed: row.total_completed,
            total_failed: row.total_failed,
            started_at: to_utc(row.started_at),
            completed_at: row.completed_at.map(to_utc),
            updated_at: to_utc(row.updated_at),
        })
    }
}

// ============================================================================
// Sync Status Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = sync_statuses)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SyncStatusRow {
    pub account_id: i64,
    pub is_active: bool,
    pub total_processed: i32,
    pub total_synced: i32,
    pub total_failed: i32,
    pub status: String,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub error_message: Option<String>,
    pub updated_at: NaiveDateTime,
}

impl TryFrom<SyncStatusRow> for SyncStatus {
    type Error = StoreError;

    fn try_from(row: SyncStatusRow) -> Result<Self, Self::Error> {
        let status = SyncState::from_str(&row.status).ok_or_else(|| StoreError::InvalidRecord {
            table: "sync_statuses",
            message: format!(
                "unknown status '{}' for account {}",
                row.status, row.account_id
            ),
        })?;
        Ok(SyncStatus {
            account_id: row.account_id,
            is_active: row.is_active,
            total_processed: row.total_processed,
            total_synced: row.total_synced,
            total_failed: row.total_failed,
            status,
            started_at: row.started_at.map(to_utc),
            completed_at: row.completed_at.map(to_utc),
            error_message: row.error_message,
            updated_at: to_utc(row.updated_at),
        })
    }
}
