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

//! Generation Lock Data Access Layer
//!
//! Mutual exclusion comes from the unique index on
//! `(account_id, content_type)`: acquisition is an `INSERT ... ON CONFLICT DO
//! NOTHING`, and zero inserted rows means another generation holds the pair.

use diesel::prelude::*;
use uuid::Uuid;

use super::models::{now, GenerationLockRow};
use super::DAL;
use crate::database::schema::{generation_locks, generation_statuses};
use crate::error::StoreError;
use crate::models::generation_lock::GenerationLock;

/// Data access layer for generation locks.
#[derive(Clone)]
pub struct GenerationLockDAL<'a> {
    dal: &'a DAL,
}

impl<'a> GenerationLockDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Inserts a lock for the pair unless one already exists.
    ///
    /// Returns `None` when the pair is already locked. Never blocks or retries.
    pub async fn try_insert(
        &self,
        account_id: i64,
        content_type: &str,
    ) -> Result<Option<GenerationLock>, StoreError> {
        let row = GenerationLockRow {
            lock_id: Uuid::new_v4().to_string(),
            account_id,
            content_type: content_type.to_string(),
            locked_at: now(),
        };

        let conn = self.dal.database.get_connection().await?;
        let candidate = row.clone();
        let inserted = conn
            .interact(move |conn| {
                diesel::insert_into(generation_locks::table)
                    .values(&candidate)
                    .on_conflict((generation_locks::account_id, generation_locks::content_type))
                    .do_nothing()
                    .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok((inserted == 1).then(|| row.into()))
    }

    /// Deletes a lock by id. Returns false if it did not exist.
    pub async fn delete(&self, lock_id: &str) -> Result<bool, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let lock_id = lock_id.to_string();
        let deleted = conn
            .interact(move |conn| diesel::delete(generation_locks::table.find(lock_id)).execute(conn))
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(deleted > 0)
    }

    pub async fn find_by_pair(
        &self,
        account_id: i64,
        content_type: &str,
    ) -> Result<Option<GenerationLock>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let content_type = content_type.to_string();
        let row: Option<GenerationLockRow> = conn
            .interact(move |conn| {
                generation_locks::table
                    .filter(generation_locks::account_id.eq(account_id))
                    .filter(generation_locks::content_type.eq(content_type))
                    .select(GenerationLockRow::as_select())
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(row.map(Into::into))
    }

    pub async fn list(&self) -> Result<Vec<GenerationLock>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let rows: Vec<GenerationLockRow> = conn
            .interact(|conn| {
                generation_locks::table
                    .order(generation_locks::locked_at.asc())
                    .select(GenerationLockRow::as_select())
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Deletes every lock whose pair has no Queuing or Processing batch.
    ///
    /// Runs in one transaction and returns the removed locks.
    pub async fn delete_orphaned(&self) -> Result<Vec<GenerationLock>, StoreError> {
        use diesel::connection::Connection;

        let conn = self.dal.database.get_connection().await?;
        let removed: Vec<GenerationLockRow> = conn
            .interact(|conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let locks: Vec<GenerationLockRow> = generation_locks::table
                        .select(GenerationLockRow::as_select())
                        .load(conn)?;

                    let mut removed = Vec::new();
                    for lock in locks {
                        let active: i64 = generation_statuses::table
                            .filter(generation_statuses::account_id.eq(lock.account_id))
                            .filter(generation_statuses::content_type.eq(&lock.content_type))
                            .filter(generation_statuses::status.eq_any(["Queuing", "Processing"]))
                            .count()
                            .get_result(conn)?;

                        if active == 0 {
                            diesel::delete(generation_locks::table.find(&lock.lock_id))
                                .execute(conn)?;
                            removed.push(lock);
                        }
                    }

                    Ok(removed)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(removed.into_iter().map(Into::into).collect())
    }
}
