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

//! Sync Status Service
//!
//! Tracks progress of the per-account post sync workflow. The `is_active`
//! flag doubles as the account's sync lock: [`SyncStatusService::start_sync`]
//! refuses to start while a previous sync is still running.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::dal::models::cutoff;
use crate::dal::DAL;
use crate::error::SyncError;
use crate::models::sync_status::{SyncState, SyncStatus};

#[derive(Clone, Debug)]
pub struct SyncStatusService {
    dal: DAL,
}

impl SyncStatusService {
    pub fn new(dal: DAL) -> Self {
        Self { dal }
    }

    /// Starts a sync for the account, resetting its counters.
    pub async fn start_sync(&self, account_id: i64) -> Result<SyncStatus, SyncError> {
        match self.dal.sync_status().try_start(account_id).await? {
            Some(status) => {
                info!(account_id, "Sync started");
                Ok(status)
            }
            None => {
                debug!(account_id, "Sync already running");
                Err(SyncError::AlreadyActive(account_id))
            }
        }
    }

    /// Counts one successfully synced item.
    pub async fn record_synced(&self, account_id: i64) -> Result<(), SyncError> {
        self.record(account_id, true).await
    }

    /// Counts one item that failed to sync.
    pub async fn record_failed(&self, account_id: i64) -> Result<(), SyncError> {
        self.record(account_id, false).await
    }

    async fn record(&self, account_id: i64, synced: bool) -> Result<(), SyncError> {
        if !self.dal.sync_status().record_item(account_id, synced).await? {
            return Err(SyncError::NotFound(account_id));
        }
        Ok(())
    }

    pub async fn complete_sync(&self, account_id: i64) -> Result<SyncStatus, SyncError> {
        let status = self
            .dal
            .sync_status()
            .finish(account_id, SyncState::Completed, None)
            .await?
            .ok_or(SyncError::NotFound(account_id))?;
        info!(
            account_id,
            processed = status.total_processed,
            synced = status.total_synced,
            failed = status.total_failed,
            "Sync completed"
        );
        Ok(status)
    }

    pub async fn fail_sync(&self, account_id: i64, error_message: &str) -> Result<SyncStatus, SyncError> {
        let status = self
            .dal
            .sync_status()
            .finish(account_id, SyncState::Failed, Some(error_message.to_string()))
            .await?
            .ok_or(SyncError::NotFound(account_id))?;
        warn!(account_id, error = error_message, "Sync failed");
        Ok(status)
    }

    pub async fn get_sync(&self, account_id: i64) -> Result<SyncStatus, SyncError> {
        self.dal
            .sync_status()
            .get(account_id)
            .await?
            .ok_or(SyncError::NotFound(account_id))
    }

    pub async fn is_active(&self, account_id: i64) -> Result<bool, SyncError> {
        Ok(self
            .dal
            .sync_status()
            .get(account_id)
            .await?
            .is_some_and(|status| status.is_active))
    }

    /// Fails active syncs that have not progressed for `stuck_duration`.
    /// Returns the number of syncs released.
    pub async fn reconcile_stuck_syncs(&self, stuck_duration: Duration) -> Result<usize, SyncError> {
        let accounts = self
            .dal
            .sync_status()
            .fail_stale(cutoff(stuck_duration), "Sync interrupted; reset on startup")
            .await?;
        for account_id in &accounts {
            warn!(account_id, "Stuck sync forced to Failed");
        }
        info!(fixed = accounts.len(), "Sync status reconciliation complete");
        Ok(accounts.len())
    }
}
