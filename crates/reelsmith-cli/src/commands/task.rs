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

//! Implementation of the `task` subcommands.

use anyhow::{Context as _, Result};
use tracing::info;

use super::{print_json, Context};

pub async fn show(ctx: &Context, task_id: &str) -> Result<()> {
    let task = ctx
        .task_manager()
        .get_task(task_id)
        .await
        .with_context(|| format!("Failed to load task {}", task_id))?;
    print_json(&task)
}

pub async fn list(ctx: &Context, account_id: i64, limit: i64, offset: i64) -> Result<()> {
    let tasks = ctx
        .task_manager()
        .get_tasks_by_account(account_id, limit, offset)
        .await
        .with_context(|| format!("Failed to list tasks for account {}", account_id))?;
    print_json(&tasks)
}

pub async fn retry(ctx: &Context, task_id: &str) -> Result<()> {
    let task = ctx
        .task_manager()
        .retry_task(task_id)
        .await
        .with_context(|| format!("Failed to retry task {}", task_id))?;
    info!("Task {} re-queued (retry {})", task.id, task.retry_count);
    print_json(&task)
}

pub async fn cancel(ctx: &Context, task_id: &str) -> Result<()> {
    let task = ctx
        .task_manager()
        .cancel_task(task_id)
        .await
        .with_context(|| format!("Failed to cancel task {}", task_id))?;
    info!("Task {} canceled", task.id);
    print_json(&task)
}

pub async fn orphans(ctx: &Context, requeue: bool) -> Result<()> {
    let manager = ctx.task_manager();
    let timeout = ctx.config.orphan_timeout();

    if requeue {
        let recovered = manager
            .recover_orphaned_tasks(timeout)
            .await
            .context("Failed to recover orphaned tasks")?;
        info!("Recovered {} orphaned task(s)", recovered);
        return print_json(&serde_json::json!({ "recovered": recovered }));
    }

    let orphans = manager
        .find_orphaned_tasks(timeout)
        .await
        .context("Failed to find orphaned tasks")?;
    if orphans.is_empty() {
        info!("No orphaned tasks older than {:?}", timeout);
    }
    print_json(&orphans)
}
