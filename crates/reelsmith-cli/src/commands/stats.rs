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

//! Implementation of the `stats` command.

use anyhow::{Context as _, Result};

use super::{print_json, Context};

pub async fn run(ctx: &Context) -> Result<()> {
    let stats = ctx
        .task_manager()
        .get_stats()
        .await
        .context("Failed to load queue statistics")?;
    print_json(&stats)
}
