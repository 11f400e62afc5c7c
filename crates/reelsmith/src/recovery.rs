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

//! Startup Recovery
//!
//! A crashed process can leave batches that never settle, locks with no
//! running batch behind them, tasks stuck in Processing and syncs that never
//! finished. [`reconcile_on_startup`] repairs all of them, in an order where
//! each step can rely on the previous one:
//!
//! 1. stuck generation statuses are forced to Failed
//! 2. locks with no active batch are removed
//! 3. tasks whose workers stopped heartbeating are recovered
//! 4. tasks over the absolute processing cap are recovered (if configured)
//! 5. stuck syncs are forced to Failed
//!
//! Every step is idempotent; running recovery twice in a row finds nothing the
//! second time.

use serde::Serialize;
use std::time::Duration;
use tracing::info;

use crate::config::QueueConfig;
use crate::dal::DAL;
use crate::error::RecoveryError;
use crate::generation::{GenerationLockService, GenerationStatusService};
use crate::queue::TaskManager;
use crate::sync::SyncStatusService;

/// Thresholds used by [`reconcile_on_startup`].
#[derive(Debug, Clone)]
pub struct RecoveryOptions {
    pub stuck_status_threshold: Duration,
    pub orphan_timeout: Duration,
    pub max_processing_time: Option<Duration>,
    pub stuck_sync_threshold: Duration,
}

impl RecoveryOptions {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            stuck_status_threshold: config.stuck_status_threshold(),
            orphan_timeout: config.orphan_timeout(),
            max_processing_time: config.max_processing_time(),
            stuck_sync_threshold: config.stuck_status_threshold(),
        }
    }
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

/// What a recovery pass repaired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub stuck_statuses: usize,
    pub orphaned_locks: usize,
    pub orphaned_tasks: usize,
    pub expired_tasks: usize,
    pub stuck_syncs: usize,
}

impl RecoveryReport {
    pub fn total(&self) -> usize {
        self.stuck_statuses
            + self.orphaned_locks
            + self.orphaned_tasks
            + self.expired_tasks
            + self.stuck_syncs
    }
}

/// Runs every reconciliation step once. Call before starting workers.
pub async fn reconcile_on_startup(
    dal: &DAL,
    config: &QueueConfig,
    options: &RecoveryOptions,
) -> Result<RecoveryReport, RecoveryError> {
    info!("Starting startup reconciliation");

    let statuses = GenerationStatusService::new(dal.clone());
    let locks = GenerationLockService::new(dal.clone());
    let tasks = TaskManager::new(dal.clone(), config.clone());
    let syncs = SyncStatusService::new(dal.clone());

    let stuck_statuses = statuses
        .reconcile_stuck_statuses(options.stuck_status_threshold)
        .await?;
    let orphaned_locks = locks.reconcile_locks_on_startup().await?;
    let orphaned_tasks = tasks.recover_orphaned_tasks(options.orphan_timeout).await?;
    let expired_tasks = match options.max_processing_time {
        Some(max) => tasks.recover_expired_tasks(max).await?,
        None => 0,
    };
    let stuck_syncs = syncs
        .reconcile_stuck_syncs(options.stuck_sync_threshold)
        .await?;

    let report = RecoveryReport {
        stuck_statuses,
        orphaned_locks,
        orphaned_tasks,
        expired_tasks,
        stuck_syncs,
    };

    info!(
        stuck_statuses,
        orphaned_locks,
        orphaned_tasks,
        expired_tasks,
        stuck_syncs,
        "Startup reconciliation complete"
    );
    metrics::counter!("reelsmith_recovered_total").increment(report.total() as u64);

    Ok(report)
}
