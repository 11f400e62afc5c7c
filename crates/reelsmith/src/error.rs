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

//! Error types for the orchestrator.
//!
//! Each component returns its own error enum. Store failures are carried
//! unchanged inside a `Store` variant so callers can tell infrastructure
//! problems apart from business-rule rejections such as [`LockError::LockHeld`]
//! or [`TaskError::InvalidState`].

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::models::task::TaskStatus;

/// Errors raised by the durable store and the data access layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    /// A persisted row could not be mapped back to its domain type.
    #[error("Invalid {table} record: {message}")]
    InvalidRecord {
        table: &'static str,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the generation lock service.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another generation already holds the lock for this pair.
    #[error("Generation already running for account {account_id} ({content_type})")]
    LockHeld {
        account_id: i64,
        content_type: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the generation status service.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("Generation status not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the task manager.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(String),

    /// The requested transition is not allowed from the task's current status.
    #[error("Cannot {operation} task {task_id}: task is {status}")]
    InvalidState {
        task_id: String,
        operation: &'static str,
        status: TaskStatus,
    },

    /// The worker no longer owns the task, usually because it was recovered.
    #[error("Task {task_id} is no longer claimed by worker {worker_id}")]
    ClaimLost { task_id: String, worker_id: String },

    /// The task's batch already settled and another generation now holds the
    /// pair, so the batch cannot reopen.
    #[error("Cannot {operation} task {task_id}: generation already running for account {account_id} ({content_type})")]
    LockHeld {
        task_id: String,
        operation: &'static str,
        account_id: i64,
        content_type: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors returned by a [`crate::executor::Renderer`].
///
/// Every render error is treated as transient: the task is retried with
/// backoff until its retry budget is spent.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("Render failed: {0}")]
    Failed(String),

    #[error("Render timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors from the sync status service.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync already running for account {0}")]
    AlreadyActive(i64),

    #[error("No sync status for account {0}")]
    NotFound(i64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from starting or inspecting a generation.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Errors from startup reconciliation.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("Lock reconciliation failed: {0}")]
    Lock(#[from] LockError),

    #[error("Status reconciliation failed: {0}")]
    Status(#[from] StatusError),

    #[error("Task recovery failed: {0}")]
    Task(#[from] TaskError),

    #[error("Sync reconciliation failed: {0}")]
    Sync(#[from] SyncError),
}

/// Errors from loading or validating a [`crate::QueueConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
