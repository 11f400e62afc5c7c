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

//! Generation Lock Service
//!
//! Guarantees at most one running generation per `(account, content type)`.
//! Acquisition is a single atomic insert against a unique index; it never
//! blocks and never retries, and a busy pair is reported as
//! [`LockError::LockHeld`].

use tracing::{debug, info, warn};

use crate::dal::DAL;
use crate::error::LockError;
use crate::models::generation_lock::GenerationLock;

#[derive(Clone, Debug)]
pub struct GenerationLockService {
    dal: DAL,
}

impl GenerationLockService {
    pub fn new(dal: DAL) -> Self {
        Self { dal }
    }

    /// Acquires the lock for a pair and returns its lock id.
    pub async fn acquire_lock(
        &self,
        account_id: i64,
        content_type: &str,
    ) -> Result<String, LockError> {
        match self
            .dal
            .generation_lock()
            .try_insert(account_id, content_type)
            .await?
        {
            Some(lock) => {
                info!(
                    account_id,
                    content_type,
                    lock_id = %lock.lock_id,
                    "Generation lock acquired"
                );
                Ok(lock.lock_id)
            }
            None => {
                debug!(account_id, content_type, "Generation lock busy");
                metrics::counter!("reelsmith_generation_lock_conflicts_total").increment(1);
                Err(LockError::LockHeld {
                    account_id,
                    content_type: content_type.to_string(),
                })
            }
        }
    }

    /// Releases a lock by id. Releasing an unknown lock is a no-op.
    pub async fn release_lock(&self, lock_id: &str) -> Result<(), LockError> {
        if self.dal.generation_lock().delete(lock_id).await? {
            info!(lock_id, "Generation lock released");
        } else {
            debug!(lock_id, "Generation lock already released");
        }
        Ok(())
    }

    pub async fn has_lock(&self, account_id: i64, content_type: &str) -> Result<bool, LockError> {
        Ok(self.get_lock(account_id, content_type).await?.is_some())
    }

    pub async fn get_lock(
        &self,
        account_id: i64,
        content_type: &str,
    ) -> Result<Option<GenerationLock>, LockError> {
        Ok(self
            .dal
            .generation_lock()
            .find_by_pair(account_id, content_type)
            .await?)
    }

    pub async fn list_locks(&self) -> Result<Vec<GenerationLock>, LockError> {
        Ok(self.dal.generation_lock().list().await?)
    }

    /// Removes locks left behind by a crashed process.
    ///
    /// A lock is orphaned when its pair has no Queuing or Processing batch.
    /// Safe to run repeatedly; returns the number of locks removed.
    pub async fn reconcile_locks_on_startup(&self) -> Result<usize, LockError> {
        let removed = self.dal.generation_lock().delete_orphaned().await?;
        for lock in &removed {
            warn!(
                account_id = lock.account_id,
                content_type = %lock.content_type,
                lock_id = %lock.lock_id,
                locked_at = %lock.locked_at,
                "Removed orphaned generation lock"
            );
        }
        info!(removed = removed.len(), "Generation lock reconciliation complete");
        Ok(removed.len())
    }
}
