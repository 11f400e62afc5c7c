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

//! Implementation of the `sync` subcommands.

use anyhow::{Context as _, Result};

use reelsmith::sync::SyncStatusService;

use super::{print_json, Context};

pub async fn show(ctx: &Context, account_id: i64) -> Result<()> {
    let status = SyncStatusService::new(ctx.dal.clone())
        .get_sync(account_id)
        .await
        .with_context(|| format!("Failed to load sync status for account {}", account_id))?;
    print_json(&status)
}
