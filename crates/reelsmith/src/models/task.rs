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

//! Task model
//!
//! A task is one unit of asynchronous rendering work. Its lifecycle is
//!
//! ```text
//! Pending -> Queued -> Processing -> Completed
//!                          |
//!                          +-> Queued (backoff retry, orphan recovery)
//!                          +-> Failed -> Queued (manual retry)
//! Pending | Queued -> Canceled
//! ```
//!
//! Each lifecycle timestamp is written only when the task enters that state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Queued,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Canceled,
    ];

    /// Returns the stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Queued => "Queued",
            TaskStatus::Processing => "Processing",
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed => "Failed",
            TaskStatus::Canceled => "Canceled",
        }
    }

    /// Parses a status from its stored representation.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(TaskStatus::Pending),
            "Queued" => Some(TaskStatus::Queued),
            "Processing" => Some(TaskStatus::Processing),
            "Completed" => Some(TaskStatus::Completed),
            "Failed" => Some(TaskStatus::Failed),
            "Canceled" => Some(TaskStatus::Canceled),
            _ => None,
        }
    }

    /// Returns true once no further automatic transition will happen.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }

    /// Returns true while the task may still be cancelled.
    pub fn is_cancelable(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Queued)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of rendering work (domain type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Opaque identifier, `<key prefix><uuid>`
    pub id: String,
    pub account_id: i64,
    /// Batch this task belongs to, if it was submitted as part of a generation
    pub generation_status_id: Option<String>,
    /// Renderer input, opaque to the orchestrator
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    /// Worker currently (or last) holding the claim
    pub worker_id: Option<String>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub processing_time_ms: i64,
    pub queue_time_ms: i64,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Earliest instant a re-queued task may be claimed again
    pub retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Snapshot of queue health.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Task counts keyed by status; every status is present.
    pub counts: BTreeMap<TaskStatus, i64>,
    /// Mean processing time of tasks completed inside the window.
    pub avg_processing_time_ms: Option<f64>,
    /// Mean queue wait of tasks completed inside the window.
    pub avg_queue_time_ms: Option<f64>,
    pub completed_since: i64,
    pub failed_since: i64,
    pub window_start: DateTime<Utc>,
}

impl QueueStats {
    /// Number of tasks currently in `status`.
    pub fn count(&self, status: TaskStatus) -> i64 {
        self.counts.get(&status).copied().unwrap_or(0)
    }
}
