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

//! Worker Pool
//!
//! A fixed number of worker loops, each claiming one task at a time and
//! handing it to the [`Renderer`]. Idle workers park on the task manager's
//! [`crate::dispatcher::WorkDistributor`] and wake on new submissions or when
//! the poll interval elapses. An optional sweep loop recovers tasks whose
//! workers stopped heartbeating.
//!
//! Shutdown is graceful: workers stop claiming, finish the task they are
//! rendering, record its result and exit.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::heartbeat::Heartbeat;
use super::renderer::Renderer;
use crate::error::{RenderError, TaskError};
use crate::models::task::Task;
use crate::queue::{FailureOutcome, TaskManager};

/// Runs tasks from a [`TaskManager`] through a [`Renderer`].
#[derive(Clone)]
pub struct WorkerPool {
    manager: TaskManager,
    renderer: Arc<dyn Renderer>,
}

/// Handles of a running pool. Dropping it without calling
/// [`WorkerPoolHandle::shutdown`] closes the shutdown channel, so workers
/// still exit after their current task but nobody waits for them.
pub struct WorkerPoolHandle {
    shutdown_sender: broadcast::Sender<()>,
    workers: Vec<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
    worker_ids: Vec<String>,
}

impl WorkerPool {
    pub fn new(manager: TaskManager, renderer: Arc<dyn Renderer>) -> Self {
        Self { manager, renderer }
    }

    /// Spawns `worker_count` worker loops and, if enabled, the orphan sweep.
    pub fn start(&self) -> WorkerPoolHandle {
        let config = self.manager.config();
        let (shutdown_sender, _) = broadcast::channel(1);

        let worker_ids: Vec<String> = (0..config.worker_count())
            .map(|index| format!("worker-{}-{}", index, Uuid::new_v4().simple()))
            .collect();

        let workers = worker_ids
            .iter()
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id.clone(),
                    manager: self.manager.clone(),
                    renderer: self.renderer.clone(),
                };
                tokio::spawn(worker.run(shutdown_sender.subscribe()))
            })
            .collect();

        let sweeper = config
            .enable_orphan_sweep()
            .then(|| tokio::spawn(run_sweeper(self.manager.clone(), shutdown_sender.subscribe())));

        info!(
            workers = config.worker_count(),
            orphan_sweep = config.enable_orphan_sweep(),
            "Worker pool started"
        );

        WorkerPoolHandle {
            shutdown_sender,
            workers,
            sweeper,
            worker_ids,
        }
    }
}

impl WorkerPoolHandle {
    pub fn worker_ids(&self) -> &[String] {
        &self.worker_ids
    }

    /// Stops claiming new work and waits for in-flight tasks to finish.
    pub async fn shutdown(self) {
        info!("Worker pool shutdown requested");
        let _ = self.shutdown_sender.send(());

        for handle in self.workers {
            if let Err(e) = handle.await {
                error!("Worker task ended abnormally: {}", e);
            }
        }
        if let Some(handle) = self.sweeper {
            let _ = handle.await;
        }
        info!("Worker pool stopped");
    }
}

struct Worker {
    id: String,
    manager: TaskManager,
    renderer: Arc<dyn Renderer>,
}

impl Worker {
    async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        debug!(worker_id = %self.id, "Worker started");
        let distributor = self.manager.distributor();

        loop {
            if !matches!(
                shutdown.try_recv(),
                Err(broadcast::error::TryRecvError::Empty)
            ) {
                break;
            }

            match self.manager.claim_next(&self.id).await {
                Ok(Some(task)) => self.process(task).await,
                Ok(None) => {
                    tokio::select! {
                        _ = distributor.wait_for_work() => {}
                        _ = shutdown.recv() => break,
                    }
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to claim task");
                    tokio::select! {
                        _ = tokio::time::sleep(self.manager.config().poll_interval()) => {}
                        _ = shutdown.recv() => break,
                    }
                }
            }
        }

        debug!(worker_id = %self.id, "Worker stopped");
    }

    async fn process(&self, task: Task) {
        let config = self.manager.config();
        let heartbeat = Heartbeat::start(
            self.manager.clone(),
            task.id.clone(),
            self.id.clone(),
            config.heartbeat_interval(),
        );

        let started = Instant::now();
        let timeout = config.task_timeout();
        let result = match tokio::time::timeout(timeout, self.renderer.render(&task)).await {
            Ok(result) => result,
            Err(_) => Err(RenderError::Timeout(timeout)),
        };
        drop(heartbeat);
        let processing_time_ms = started.elapsed().as_millis() as i64;

        let recorded = match &result {
            Ok(()) => self
                .manager
                .complete_task(&task.id, &self.id, processing_time_ms)
                .await
                .map(|_| ()),
            Err(render_error) => self
                .manager
                .fail_task(&task, &self.id, render_error, processing_time_ms)
                .await
                .map(|outcome| {
                    if let FailureOutcome::Retrying { retry_at, .. } = outcome {
                        debug!(task_id = %task.id, %retry_at, "Retry scheduled");
                    }
                }),
        };

        match recorded {
            Ok(()) => {}
            Err(TaskError::ClaimLost { .. }) => {
                warn!(
                    task_id = %task.id,
                    worker_id = %self.id,
                    "Discarding result; task was recovered by another worker"
                );
            }
            Err(e) => {
                error!(
                    task_id = %task.id,
                    worker_id = %self.id,
                    error = %e,
                    "Failed to record task result"
                );
            }
        }
    }
}

async fn run_sweeper(manager: TaskManager, mut shutdown: broadcast::Receiver<()>) {
    let config = manager.config().clone();
    let mut ticker = tokio::time::interval(config.sweep_interval());

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.recv() => break,
        }

        match manager.recover_orphaned_tasks(config.orphan_timeout()).await {
            Ok(0) => {}
            Ok(recovered) => info!(recovered, "Orphan sweep recovered tasks"),
            Err(e) => error!(error = %e, "Orphan sweep failed"),
        }

        if let Some(max_processing_time) = config.max_processing_time() {
            match manager.recover_expired_tasks(max_processing_time).await {
                Ok(0) => {}
                Ok(recovered) => info!(recovered, "Expired task sweep recovered tasks"),
                Err(e) => error!(error = %e, "Expired task sweep failed"),
            }
        }
    }

    debug!("Orphan sweep stopped");
}
