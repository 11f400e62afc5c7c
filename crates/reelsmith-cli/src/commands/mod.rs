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

//! Command implementations. Results are printed to stdout as JSON; logs go
//! to stderr.

pub mod lock;
pub mod reconcile;
pub mod stats;
pub mod sync;
pub mod task;

use anyhow::{Context as _, Result};
use serde::Serialize;
use std::path::Path;

use reelsmith::queue::TaskManager;
use reelsmith::{Database, QueueConfig, DAL};

/// Connected store plus the loaded queue configuration.
pub struct Context {
    pub dal: DAL,
    pub config: QueueConfig,
}

impl Context {
    pub async fn connect(database_url: &str, config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => QueueConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => QueueConfig::default(),
        };

        let database = Database::new(database_url).context("Failed to connect to database")?;
        database
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;

        Ok(Self {
            dal: DAL::new(database),
            config,
        })
    }

    pub fn task_manager(&self) -> TaskManager {
        TaskManager::new(self.dal.clone(), self.config.clone())
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{}", rendered);
    Ok(())
}
