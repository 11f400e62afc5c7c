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

//! Background heartbeat for a claimed task.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::queue::TaskManager;

/// Refreshes a claimed task's heartbeat on an interval until dropped.
///
/// The loop stops on its own once a heartbeat reports that the worker no
/// longer owns the task, which happens after orphan recovery hands the task
/// to another worker.
pub struct Heartbeat {
    handle: JoinHandle<()>,
}

impl Heartbeat {
    pub fn start(
        manager: TaskManager,
        task_id: String,
        worker_id: String,
        interval: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // claim_next already stamped the first heartbeat
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match manager.heartbeat(&task_id, &worker_id).await {
                    Ok(true) => debug!(task_id = %task_id, worker_id = %worker_id, "Heartbeat"),
                    Ok(false) => {
                        warn!(
                            task_id = %task_id,
                            worker_id = %worker_id,
                            "Heartbeat rejected; task is no longer claimed by this worker"
                        );
                        break;
                    }
                    Err(e) => {
                        warn!(task_id = %task_id, error = %e, "Heartbeat failed");
                    }
                }
            }
        });

        Self { handle }
    }

    /// True once the heartbeat loop has stopped.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
