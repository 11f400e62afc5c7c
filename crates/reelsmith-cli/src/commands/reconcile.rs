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

//! Implementation of the `reconcile` command.

use anyhow::{Context as _, Result};
use std::time::Duration;
use tracing::info;

use reelsmith::recovery::{reconcile_on_startup, RecoveryOptions};

use super::{print_json, Context};

pub async fn run(
    ctx: &Context,
    stuck_hours: Option<u64>,
    max_processing_secs: Option<u64>,
) -> Result<()> {
    let mut options = RecoveryOptions::from_config(&ctx.config);
    if let Some(hours) = stuck_hours {
        options.stuck_status_threshold = Duration::from_secs(hours * 3600);
        options.stuck_sync_threshold = options.stuck_status_threshold;
    }
    if let Some(secs) = max_processing_secs {
        options.max_processing_time = Some(Duration::from_secs(secs));
    }

    info!(?options, "Running reconciliation");
    let report = reconcile_on_startup(&ctx.dal, &ctx.config, &options)
        .await
        .context("Reconciliation failed")?;

    print_json(&report)
}
