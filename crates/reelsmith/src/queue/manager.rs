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

//! Task Manager
//!
//! The public face of the durable queue. Submissions return synchronously
//! once the task is Queued; workers claim through [`TaskManager::claim_next`]
//! and report back through [`TaskManager::complete_task`] and
//! [`TaskManager::fail_task`]. Every transition that finishes a batch unit is
//! followed by an attempt to settle the batch.
//!
//! # Task lifecycle
//!
//! - `submit_task` / `submit_batch`: Pending -> Queued
//! - `claim_next`: Queued -> Processing
//! - `complete_task`: Processing -> Completed
//! - `fail_task`: Processing -> Queued (with backoff) or Failed
//! - `retry_task`: Failed -> Queued
//! - `cancel_task`: Pending | Queued -> Canceled
//! - `requeue_orphaned_task`: Processing -> Queued

use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::backoff::BackoffPolicy;
use crate::config::QueueConfig;
use crate::dal::models::cutoff;
use crate::dal::task::{NewTask, TransitionOutcome};
use crate::dal::DAL;
use crate::dispatcher::{PollingDistributor, WorkDistributor};
use crate::error::{RenderError, StatusError, TaskError};
use crate::generation::GenerationTracker;
use crate::models::task::{QueueStats, Task, TaskStatus};

/// What happened to a task after a failed render.
#[derive(Debug, Clone)]
pub enum FailureOutcome {
    /// Re-queued; it becomes claimable at `retry_at`.
    Retrying {
        retry_count: i32,
        retry_at: chrono::DateTime<Utc>,
    },
    /// Retry budget spent; the task is Failed.
    Failed,
}

/// Submits, tracks and transitions tasks.
///
/// Cloning is cheap; clones share the same store, distributor and alert state.
#[derive(Clone)]
pub struct TaskManager {
    dal: DAL,
    config: Arc<QueueConfig>,
    backoff: BackoffPolicy,
    distributor: Arc<dyn WorkDistributor>,
    tracker: GenerationTracker,
    last_dlq_alert: Arc<Mutex<Option<Instant>>>,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TaskManager {
    /// Creates a task manager with an in-process polling distributor.
    pub fn new(dal: DAL, config: QueueConfig) -> Self {
        let distributor = Arc::new(PollingDistributor::with_poll_interval(
            config.poll_interval(),
        ));
        Self::with_distributor(dal, config, distributor)
    }

    /// Creates a task manager that signals new work through `distributor`.
    pub fn with_distributor(
        dal: DAL,
        config: QueueConfig,
        distributor: Arc<dyn WorkDistributor>,
    ) -> Self {
        Self {
            tracker: GenerationTracker::new(dal.clone()),
            backoff: BackoffPolicy::from_config(&config),
            dal,
            config: Arc::new(config),
            distributor,
            last_dlq_alert: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn distributor(&self) -> Arc<dyn WorkDistributor> {
        self.distributor.clone()
    }

    fn new_task_id(&self) -> String {
        format!("{}{}", self.config.key_prefix(), Uuid::new_v4())
    }

    // ------------------------------------------------------------------
    // Submission and lookup
    // ------------------------------------------------------------------

    /// Submits a standalone task and returns its id once it is Queued.
    pub async fn submit_task(
        &self,
        account_id: i64,
        payload: serde_json::Value,
    ) -> Result<String, TaskError> {
        let mut ids = self.submit(account_id, None, vec![payload]).await?;
        ids.pop()
            .ok_or_else(|| TaskError::NotFound("submitted task".to_string()))
    }

    /// Submits one task per payload as units of a generation batch.
    ///
    /// All tasks and the batch's queued counter commit together.
    pub async fn submit_batch(
        &self,
        account_id: i64,
        generation_status_id: &str,
        payloads: Vec<serde_json::Value>,
    ) -> Result<Vec<String>, TaskError> {
        self.submit(account_id, Some(generation_status_id.to_string()), payloads)
            .await
    }

    async fn submit(
        &self,
        account_id: i64,
        generation_status_id: Option<String>,
        payloads: Vec<serde_json::Value>,
    ) -> Result<Vec<String>, TaskError> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let new_tasks: Vec<NewTask> = payloads
            .into_iter()
            .map(|payload| NewTask {
                id: self.new_task_id(),
                account_id,
                payload,
            })
            .collect();

        let created = self
            .dal
            .task()
            .create_queued(generation_status_id.clone(), new_tasks)
            .await
            .map_err(|e| match (e, &generation_status_id) {
                (crate::error::StoreError::Database(diesel::result::Error::NotFound), Some(id)) => {
                    TaskError::NotFound(format!("generation status {}", id))
                }
                (e, _) => TaskError::Store(e),
            })?;

        for task in &created {
            info!(
                task_id = %task.id,
                account_id,
                generation_status_id = ?task.generation_status_id,
                "Task state change: Pending -> Queued"
            );
        }
        metrics::counter!("reelsmith_tasks_submitted_total").increment(created.len() as u64);

        self.distributor.notify_work();
        Ok(created.into_iter().map(|task| task.id).collect())
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task, TaskError> {
        self.dal
            .task()
            .get(task_id)
            .await?
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }

    /// Tasks for an account, newest first.
    pub async fn get_tasks_by_account(
        &self,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Task>, TaskError> {
        Ok(self
            .dal
            .task()
            .list_by_account(account_id, limit.max(0), offset.max(0))
            .await?)
    }

    pub async fn get_tasks_by_generation(&self, status_id: &str) -> Result<Vec<Task>, TaskError> {
        Ok(self.dal.task().list_by_generation(status_id).await?)
    }

    /// Counts by status plus averages and failures over the configured window.
    pub async fn get_stats(&self) -> Result<QueueStats, TaskError> {
        Ok(self
            .dal
            .task()
            .stats(cutoff(self.config.stats_window()))
            .await?)
    }

    // ------------------------------------------------------------------
    // Administrative transitions
    // ------------------------------------------------------------------

    /// Re-queues a Failed task with `retry_count + 1`.
    ///
    /// A task whose batch has settled reopens the batch and takes the pair's
    /// lock back. Fails with [`TaskError::LockHeld`] if another generation
    /// started for the pair in the meantime.
    pub async fn retry_task(&self, task_id: &str) -> Result<Task, TaskError> {
        match self.dal.task().retry_failed(task_id).await? {
            TransitionOutcome::Applied(task) => {
                info!(
                    task_id,
                    retry_count = task.retry_count,
                    "Task state change: Failed -> Queued (manual retry)"
                );
                metrics::counter!("reelsmith_tasks_retried_total", "trigger" => "manual")
                    .increment(1);
                self.distributor.notify_work();
                Ok(task)
            }
            TransitionOutcome::Rejected(status) => Err(TaskError::InvalidState {
                task_id: task_id.to_string(),
                operation: "retry",
                status,
            }),
            TransitionOutcome::PairLocked {
                account_id,
                content_type,
            } => Err(TaskError::LockHeld {
                task_id: task_id.to_string(),
                operation: "retry",
                account_id,
                content_type,
            }),
            TransitionOutcome::NotFound => Err(TaskError::NotFound(task_id.to_string())),
        }
    }

    /// Cancels a task that no worker has claimed yet.
    pub async fn cancel_task(&self, task_id: &str) -> Result<Task, TaskError> {
        match self.dal.task().cancel(task_id).await? {
            TransitionOutcome::Applied(task) => {
                info!(task_id, "Task state change: Queued -> Canceled");
                metrics::counter!("reelsmith_tasks_canceled_total").increment(1);
                self.settle(&task).await;
                Ok(task)
            }
            TransitionOutcome::Rejected(status) => Err(TaskError::InvalidState {
                task_id: task_id.to_string(),
                operation: "cancel",
                status,
            }),
            TransitionOutcome::PairLocked {
                account_id,
                content_type,
            } => Err(TaskError::LockHeld {
                task_id: task_id.to_string(),
                operation: "cancel",
                account_id,
                content_type,
            }),
            TransitionOutcome::NotFound => Err(TaskError::NotFound(task_id.to_string())),
        }
    }

    // ------------------------------------------------------------------
    // Worker operations
    // ------------------------------------------------------------------

    /// Claims the next claimable task for `worker_id`.
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<Task>, TaskError> {
        let claimed = self.dal.task().claim_next(worker_id).await?;
        if let Some(task) = &claimed {
            info!(
                task_id = %task.id,
                worker_id,
                retry_count = task.retry_count,
                queue_time_ms = task.queue_time_ms,
                "Task state change: Queued -> Processing"
            );
            metrics::histogram!("reelsmith_task_queue_ms").record(task.queue_time_ms as f64);
        }
        Ok(claimed)
    }

    /// Refreshes the worker's heartbeat. Returns false once the claim is lost.
    pub async fn heartbeat(&self, task_id: &str, worker_id: &str) -> Result<bool, TaskError> {
        Ok(self.dal.task().heartbeat(task_id, worker_id).await?)
    }

    /// Records a successful render.
    pub async fn complete_task(
        &self,
        task_id: &str,
        worker_id: &str,
        processing_time_ms: i64,
    ) -> Result<Task, TaskError> {
        let task = self
            .dal
            .task()
            .complete_owned(task_id, worker_id, processing_time_ms)
            .await?
            .ok_or_else(|| TaskError::ClaimLost {
                task_id: task_id.to_string(),
                worker_id: worker_id.to_string(),
            })?;

        info!(
            task_id,
            worker_id,
            processing_time_ms,
            "Task state change: Processing -> Completed"
        );
        metrics::counter!("reelsmith_tasks_completed_total").increment(1);
        metrics::histogram!("reelsmith_task_processing_ms").record(processing_time_ms as f64);

        self.settle(&task).await;
        Ok(task)
    }

    /// Records a failed render: re-queues with backoff while retries remain,
    /// otherwise marks the task Failed and checks the dead-letter threshold.
    pub async fn fail_task(
        &self,
        task: &Task,
        worker_id: &str,
        error: &RenderError,
        processing_time_ms: i64,
    ) -> Result<FailureOutcome, TaskError> {
        let message = error.to_string();
        let reason = match error {
            RenderError::Timeout(_) => "timeout",
            RenderError::Failed(_) => "error",
        };
        let claim_lost = || TaskError::ClaimLost {
            task_id: task.id.clone(),
            worker_id: worker_id.to_string(),
        };

        if task.retry_count < self.config.max_retries() {
            let delay = self.backoff.delay(task.retry_count);
            let retry_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            let updated = self
                .dal
                .task()
                .requeue_owned(&task.id, worker_id, &message, retry_at.naive_utc())
                .await?
                .ok_or_else(claim_lost)?;

            warn!(
                task_id = %task.id,
                worker_id,
                retry_count = updated.retry_count,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "Task state change: Processing -> Queued (retry scheduled)"
            );
            metrics::counter!("reelsmith_tasks_retried_total", "trigger" => reason).increment(1);
            self.distributor.notify_work();

            return Ok(FailureOutcome::Retrying {
                retry_count: updated.retry_count,
                retry_at,
            });
        }

        let updated = self
            .dal
            .task()
            .fail_owned(&task.id, worker_id, &message, processing_time_ms)
            .await?
            .ok_or_else(claim_lost)?;

        error!(
            task_id = %task.id,
            worker_id,
            retry_count = updated.retry_count,
            error = %message,
            "Task state change: Processing -> Failed"
        );
        metrics::counter!("reelsmith_tasks_failed_total", "reason" => reason).increment(1);

        self.settle(&updated).await;
        self.check_dead_letter_threshold().await?;
        Ok(FailureOutcome::Failed)
    }

    /// Raises a dead-letter alert when failures inside the stats window
    /// exceed the configured threshold. At most one alert per window.
    async fn check_dead_letter_threshold(&self) -> Result<(), TaskError> {
        let window = self.config.stats_window();
        let failures = self.dal.task().count_failed_since(cutoff(window)).await?;
        if failures <= self.config.dlq_alert_threshold() {
            return Ok(());
        }

        let should_alert = match self.last_dlq_alert.lock() {
            Ok(mut last) => {
                let due = last.map_or(true, |at| at.elapsed() >= window);
                if due {
                    *last = Some(Instant::now());
                }
                due
            }
            Err(_) => true,
        };

        if should_alert {
            warn!(
                failures,
                threshold = self.config.dlq_alert_threshold(),
                window_secs = window.as_secs(),
                "Dead-letter alert: failed tasks exceed threshold"
            );
            metrics::counter!("reelsmith_dead_letter_alerts_total").increment(1);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Orphan detection and recovery
    // ------------------------------------------------------------------

    /// Processing tasks whose heartbeat is older than `timeout` or missing.
    pub async fn find_orphaned_tasks(&self, timeout: Duration) -> Result<Vec<Task>, TaskError> {
        Ok(self.dal.task().find_orphaned(cutoff(timeout)).await?)
    }

    /// Processing tasks that started more than `max_processing_time` ago.
    pub async fn find_expired_processing_tasks(
        &self,
        max_processing_time: Duration,
    ) -> Result<Vec<Task>, TaskError> {
        Ok(self.dal.task().find_expired(cutoff(max_processing_time)).await?)
    }

    /// Puts a Processing task back in the queue with `retry_count + 1`.
    pub async fn requeue_orphaned_task(&self, task_id: &str) -> Result<Task, TaskError> {
        match self.dal.task().requeue_processing(task_id, None).await? {
            TransitionOutcome::Applied(task) => {
                warn!(
                    task_id,
                    retry_count = task.retry_count,
                    "Task state change: Processing -> Queued (orphan requeued)"
                );
                metrics::counter!("reelsmith_tasks_retried_total", "trigger" => "orphan")
                    .increment(1);
                self.distributor.notify_work();
                Ok(task)
            }
            TransitionOutcome::Rejected(status) => Err(TaskError::InvalidState {
                task_id: task_id.to_string(),
                operation: "requeue",
                status,
            }),
            TransitionOutcome::PairLocked {
                account_id,
                content_type,
            } => Err(TaskError::LockHeld {
                task_id: task_id.to_string(),
                operation: "requeue",
                account_id,
                content_type,
            }),
            TransitionOutcome::NotFound => Err(TaskError::NotFound(task_id.to_string())),
        }
    }

    /// Recovers every task whose heartbeat is older than `timeout`.
    ///
    /// Tasks with retries left are re-queued; the rest are marked Failed.
    /// A task that heartbeats between the scan and its recovery is skipped.
    /// Returns the number of tasks recovered.
    pub async fn recover_orphaned_tasks(&self, timeout: Duration) -> Result<usize, TaskError> {
        let stale_before = cutoff(timeout);
        let orphans = self.dal.task().find_orphaned(stale_before).await?;
        self.recover(orphans, Some(stale_before), "orphaned").await
    }

    /// Recovers every task processing for longer than `max_processing_time`.
    pub async fn recover_expired_tasks(
        &self,
        max_processing_time: Duration,
    ) -> Result<usize, TaskError> {
        let expired = self
            .dal
            .task()
            .find_expired(cutoff(max_processing_time))
            .await?;
        self.recover(expired, None, "expired").await
    }

    async fn recover(
        &self,
        candidates: Vec<Task>,
        stale_before: Option<chrono::NaiveDateTime>,
        kind: &'static str,
    ) -> Result<usize, TaskError> {
        let mut recovered = 0;
        for task in candidates {
            let outcome = if task.retry_count < self.config.max_retries() {
                self.dal
                    .task()
                    .requeue_processing(&task.id, stale_before)
                    .await?
            } else {
                self.dal
                    .task()
                    .abandon_processing(
                        &task.id,
                        stale_before,
                        &format!("Task {} after {} retries", kind, task.retry_count),
                    )
                    .await?
            };

            match outcome {
                TransitionOutcome::Applied(updated) => {
                    recovered += 1;
                    warn!(
                        task_id = %updated.id,
                        previous_worker = ?task.worker_id,
                        retry_count = updated.retry_count,
                        status = %updated.status,
                        "Recovered {} task",
                        kind
                    );
                    if updated.status == TaskStatus::Failed {
                        metrics::counter!("reelsmith_tasks_failed_total", "reason" => kind)
                            .increment(1);
                        self.settle(&updated).await;
                    } else {
                        metrics::counter!("reelsmith_tasks_retried_total", "trigger" => kind)
                            .increment(1);
                    }
                }
                TransitionOutcome::Rejected(status) => {
                    debug!(task_id = %task.id, %status, "Skipped recovery; task moved on");
                }
                TransitionOutcome::PairLocked { .. } | TransitionOutcome::NotFound => {
                    debug!(task_id = %task.id, "Skipped recovery; task not recoverable");
                }
            }
        }

        if recovered > 0 {
            self.distributor.notify_work();
        }
        Ok(recovered)
    }

    /// Settles the task's batch if this was its last outstanding unit.
    ///
    /// Settlement failures are logged rather than returned: the task's own
    /// transition has already committed, and startup reconciliation repairs
    /// any batch left unsettled.
    async fn settle(&self, task: &Task) {
        let Some(status_id) = &task.generation_status_id else {
            return;
        };
        match self.tracker.settle(status_id).await {
            Ok(_) => {}
            Err(StatusError::NotFound(_)) => {
                debug!(status_id = %status_id, "Batch vanished before settlement");
            }
            Err(e) => {
                error!(status_id = %status_id, error = %e, "Failed to settle generation batch");
            }
        }
    }
}
