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

//! SQLite connection pool built on `deadpool-diesel`.
//!
//! Connection strings may be a plain file path, a `sqlite://` URL, or a
//! `file:` URI such as `file:memdb?mode=memory&cache=shared`.
//!
//! ```rust,ignore
//! use reelsmith::database::Database;
//!
//! let db = Database::new("sqlite://reelsmith.db")?;
//! db.run_migrations().await?;
//! ```

use deadpool_diesel::sqlite::{Manager as SqliteManager, Pool as SqlitePool, Runtime};
use tracing::info;

use crate::error::StoreError;

/// Pooled handle to the orchestrator's SQLite database.
///
/// Cloning is cheap; clones share the same pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    url: String,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("url", &self.url).finish()
    }
}

impl Database {
    /// SQLite allows a single writer even in WAL mode, so every statement goes
    /// through one pooled connection to avoid "database is locked" errors.
    const POOL_SIZE: usize = 1;

    /// Creates a new connection pool for the given SQLite location.
    pub fn new(connection_string: &str) -> Result<Self, StoreError> {
        let url = Self::build_sqlite_url(connection_string);
        let manager = SqliteManager::new(url.clone(), Runtime::Tokio1);
        let pool = SqlitePool::builder(manager)
            .max_size(Self::POOL_SIZE)
            .build()
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        info!(
            "SQLite connection pool initialized (size: {})",
            Self::POOL_SIZE
        );

        Ok(Self { pool, url })
    }

    fn build_sqlite_url(connection_string: &str) -> String {
        connection_string
            .strip_prefix("sqlite://")
            .unwrap_or(connection_string)
            .to_string()
    }

    /// The connection string the pool was opened with, minus any `sqlite://` scheme.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Gets a pooled connection.
    pub async fn get_connection(
        &self,
    ) -> Result<deadpool::managed::Object<SqliteManager>, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))
    }

    /// Applies connection pragmas and runs pending migrations.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        use diesel::prelude::*;
        use diesel_migrations::MigrationHarness;

        let conn = self.get_connection().await?;
        conn.interact(|conn| -> Result<(), StoreError> {
            // WAL lets readers proceed during a write; busy_timeout makes
            // competing processes wait instead of failing immediately.
            diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
            diesel::sql_query("PRAGMA busy_timeout=30000;").execute(conn)?;

            let applied = conn
                .run_pending_migrations(super::MIGRATIONS)
                .map_err(|e| StoreError::Migration(e.to_string()))?;
            if !applied.is_empty() {
                info!("Applied {} migration(s)", applied.len());
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Migration(format!("Failed to run migrations: {}", e)))??;

        Ok(())
    }
}
