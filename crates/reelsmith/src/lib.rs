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

//! # Reelsmith
//!
//! Durable orchestration for batched content generation.
//!
//! An account asks for a batch of rendered variants. Reelsmith guarantees that
//! at most one batch runs per `(account, content type)` pair, fans the batch out
//! into individually retryable tasks, drives those tasks through a bounded worker
//! pool, and keeps per-batch progress counters in the store so that a crashed
//! process can be reconciled on the next start.
//!
//! ## Components
//!
//! - [`generation::GenerationLockService`]: per-pair exclusivity tokens
//! - [`generation::GenerationStatusService`]: per-batch progress counters
//! - [`queue::TaskManager`]: task submission, lifecycle, retry and cancel
//! - [`executor::WorkerPool`]: parallel workers calling a [`executor::Renderer`]
//! - [`sync::SyncStatusService`]: status and lock for the post sync workflow
//! - [`recovery::reconcile_on_startup`]: startup repair of stuck state
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use reelsmith::{Database, DAL, QueueConfig};
//! use reelsmith::generation::GenerationOrchestrator;
//! use reelsmith::queue::TaskManager;
//!
//! let database = Database::new("sqlite://reelsmith.db")?;
//! database.run_migrations().await?;
//! let dal = DAL::new(database);
//!
//! let config = QueueConfig::default();
//! reelsmith::recovery::reconcile_on_startup(&dal, &config, &Default::default()).await?;
//!
//! let tasks = TaskManager::new(dal.clone(), config.clone());
//! let orchestrator = GenerationOrchestrator::new(dal.clone(), tasks.clone());
//! let handle = orchestrator
//!     .start_generation(42, "video", vec![serde_json::json!({"clip": 1})])
//!     .await?;
//! ```

pub mod config;
pub mod dal;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod generation;
pub mod logging;
pub mod models;
pub mod queue;
pub mod recovery;
pub mod sync;

pub use config::QueueConfig;
pub use dal::DAL;
pub use database::Database;
pub use error::{
    ConfigError, GenerationError, LockError, RecoveryError, RenderError, StatusError, StoreError,
    SyncError, TaskError,
};
pub use logging::init_logging;
pub use models::generation_lock::GenerationLock;
pub use models::generation_status::{GenerationState, GenerationStatus};
pub use models::sync_status::{SyncState, SyncStatus};
pub use models::task::{QueueStats, Task, TaskStatus};
