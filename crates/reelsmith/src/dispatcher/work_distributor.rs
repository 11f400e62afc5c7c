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

//! Work distribution abstraction for waking idle workers.
//!
//! Workers that find the queue empty park in [`WorkDistributor::wait_for_work`].
//! The task manager calls [`WorkDistributor::notify_work`] after every
//! submission or re-queue so parked workers in the same process wake at once;
//! a poll interval covers work that arrives from other processes sharing the
//! database and retries whose backoff has elapsed.
//!
//! ```rust,ignore
//! use reelsmith::dispatcher::{PollingDistributor, WorkDistributor};
//!
//! let distributor = PollingDistributor::new();
//!
//! loop {
//!     match tasks.claim_next(&worker_id).await? {
//!         Some(task) => process(task).await,
//!         None => distributor.wait_for_work().await,
//!     }
//! }
//! ```

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Trait for abstracting work notification mechanisms.
#[async_trait]
pub trait WorkDistributor: Send + Sync {
    /// Wait until work might be available, or the poll interval elapses.
    ///
    /// The caller should attempt to claim work after this returns and handle
    /// the case where nothing is actually available.
    async fn wait_for_work(&self);

    /// Signals that new work may be claimable.
    fn notify_work(&self);
}

/// In-process work distributor with a polling fallback.
pub struct PollingDistributor {
    poll_interval: Duration,
    notify: Notify,
}

impl PollingDistributor {
    const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

    /// Creates a distributor with the default poll interval (500ms).
    pub fn new() -> Self {
        Self::with_poll_interval(Self::DEFAULT_POLL_INTERVAL)
    }

    /// Creates a distributor with a custom poll interval.
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            notify: Notify::new(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Default for PollingDistributor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkDistributor for PollingDistributor {
    async fn wait_for_work(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => {
                debug!("Poll interval elapsed");
            }
            _ = self.notify.notified() => {
                debug!("Woke from work notification");
            }
        }
    }

    fn notify_work(&self) {
        self.notify.notify_waiters();
    }
}
