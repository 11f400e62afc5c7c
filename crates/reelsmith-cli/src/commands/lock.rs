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

//! Implementation of the `lock` subcommands.

use anyhow::{Context as _, Result};
use chrono::Utc;
use serde_json::json;

use reelsmith::generation::GenerationLockService;

use super::{print_json, Context};

pub async fn list(ctx: &Context) -> Result<()> {
    let locks = GenerationLockService::new(ctx.dal.clone())
        .list_locks()
        .await
        .context("Failed to list generation locks")?;

    let now = Utc::now();
    let rendered: Vec<_> = locks
        .iter()
        .map(|lock| {
            json!({
                "lock_id": lock.lock_id,
                "account_id": lock.account_id,
                "content_type": lock.content_type,
                "locked_at": lock.locked_at,
                "held_secs": (now - lock.locked_at).num_seconds(),
            })
        })
        .collect();
    print_json(&rendered)
}
