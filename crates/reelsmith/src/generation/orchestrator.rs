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

//! Request-level entry point for a generation batch.
//!
//! Starting a generation takes the pair's lock, opens a batch status bound to
//! that lock and submits one task per payload. Any failure after the lock is
//! taken unwinds what was created so the pair is free again.

use serde::Serialize;
use tracing::{error, info, warn};

use super::{GenerationLockService, GenerationStatusService, GenerationTracker};
use crate::dal::DAL;
use crate::error::GenerationError;
use crate::models::generation_status::GenerationStatus;
use crate::queue::TaskManager;

/// Identifiers of a freshly started generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationHandle {
    pub status_id: String,
    pub lock_id: String,
    pub task_ids: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct GenerationOrchestrator {
    locks: GenerationLockService,
    statuses: GenerationStatusService,
    tracker: GenerationTracker,
    tasks: TaskManager,
}

impl GenerationOrchestrator {
    pub fn new(dal: DAL, tasks: TaskManager) -> Self {
        Self {
            locks: GenerationLockService::new(dal.clone()),
            statuses: GenerationStatusService::new(dal.clone()),
            tracker: GenerationTracker::new(dal),
            tasks,
        }
    }

    pub fn locks(&self) -> &GenerationLockService {
        &self.locks
    }

    pub fn statuses(&self) -> &GenerationStatusService {
        &self.statuses
    }

    /// Starts a batch of `payloads.len()` units for the pair.
    ///
    /// Fails with [`crate::LockError::LockHeld`] if the pair is already
    /// generating. An empty batch settles immediately as Completed and frees
    /// the lock.
    pub async fn start_generation(
        &self,
        account_id: i64,
        content_type: &str,
        payloads: Vec<serde_json::Value>,
    ) -> Result<GenerationHandle, GenerationError> {
        let lock_id = self.locks.acquire_lock(account_id, content_type).await?;

        let status = match self
            .statuses
            .create_status(account_id, content_type, Some(&lock_id))
            .await
        {
            Ok(status) => status,
            Err(e) => {
                error!(account_id, content_type, error = %e, "Failed to create generation status");
                self.release_quietly(&lock_id).await;
                return Err(e.into());
            }
        };

        let units = payloads.len();
        let task_ids = match self
            .tasks
            .submit_batch(account_id, &status.id, payloads)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                error!(
                    status_id = %status.id,
                    error = %e,
                    "Failed to submit generation tasks"
                );
                if let Err(mark_err) = self.statuses.mark_failed(&status.id).await {
                    warn!(status_id = %status.id, error = %mark_err, "Failed to mark generation failed");
                }
                self.release_quietly(&lock_id).await;
                return Err(e.into());
            }
        };

        if task_ids.is_empty() {
            self.tracker.settle(&status.id).await?;
        }

        info!(
            account_id,
            content_type,
            status_id = %status.id,
            units,
            "Generation started"
        );

        Ok(GenerationHandle {
            status_id: status.id,
            lock_id,
            task_ids,
        })
    }

    pub async fn get_generation(&self, status_id: &str) -> Result<GenerationStatus, GenerationError> {
        Ok(self.statuses.get_status(status_id).await?)
    }

    /// True while the pair holds a generation lock.
    pub async fn is_generating(
        &self,
        account_id: i64,
        content_type: &str,
    ) -> Result<bool, GenerationError> {
        Ok(self.locks.has_lock(account_id, content_type).await?)
    }

    async fn release_quietly(&self, lock_id: &str) {
        if let Err(e) = self.locks.release_lock(lock_id).await {
            warn!(lock_id, error = %e, "Failed to release generation lock");
        }
    }
}
