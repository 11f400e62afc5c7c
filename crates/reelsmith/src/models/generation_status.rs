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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a generation batch.
///
/// `Queuing -> Processing -> {Completed, Failed}`. Startup reconciliation
/// may force any non-terminal state to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GenerationState {
    Queuing,
    Processing,
    Completed,
    Failed,
}

impl GenerationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationState::Queuing => "Queuing",
            GenerationState::Processing => "Processing",
            GenerationState::Completed => "Completed",
            GenerationState::Failed => "Failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Queuing" => Some(GenerationState::Queuing),
            "Processing" => Some(GenerationState::Processing),
            "Completed" => Some(GenerationState::Completed),
            "Failed" => Some(GenerationState::Failed),
            _ => None,
        }
    }

    /// Queuing and Processing batches hold their lock.
    pub fn is_active(&self) -> bool {
        matches!(self, GenerationState::Queuing | GenerationState::Processing)
    }
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate progress of one generation batch.
///
/// The four counters always sum to the number of units submitted to the
/// batch, and none of them is ever negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationStatus {
    pub id: String,
    pub account_id: i64,
    pub content_type: String,
    /// Lock guarding this batch; released when the batch settles
    pub lock_id: Option<String>,
    pub status: GenerationState,
    pub total_queued: i32,
    pub total_processing: i32,
    pub total_completed: i32,
    pub total_failed: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationStatus {
    /// Units submitted to the batch so far.
    pub fn total_units(&self) -> i32 {
        self.total_queued + self.total_processing + self.total_completed + self.total_failed
    }

    /// True when no unit is waiting or running.
    pub fn is_drained(&self) -> bool {
        self.total_queued == 0 && self.total_processing == 0
    }
}
