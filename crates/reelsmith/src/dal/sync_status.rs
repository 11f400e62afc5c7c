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

//! Sync Status Data Access Layer
//!
//! One row per account. Starting a sync is a single upsert that only takes
//! effect when no row exists or the existing row is inactive, so the
//! `is_active` flag behaves as a per-account lock.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text, Timestamp};

use super::models::{now, SyncStatusRow};
use super::DAL;
use crate::database::schema::sync_statuses;
use crate::error::StoreError;
use crate::models::sync_status::{SyncState, SyncStatus};

/// Data access layer for sync status rows.
#[derive(Clone)]
pub struct SyncStatusDAL<'a> {
    dal: &'a DAL,
}

impl<'a> SyncStatusDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Activates the account's sync and resets its counters.
    ///
    /// Returns `None` if a sync is already active.
    pub async fn try_start(&self, account_id: i64) -> Result<Option<SyncStatus>, StoreError> {
        use diesel::connection::Connection;

        let conn = self.dal.database.get_connection().await?;
        let row: Option<SyncStatusRow> = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let ts = now();
                    let updated = diesel::sql_query(
                        "INSERT INTO sync_statuses \
                             (account_id, is_active, total_processed, total_synced, total_failed, \
                              status, started_at, completed_at, error_message, updated_at) \
                         VALUES (?, 1, 0, 0, 0, ?, ?, NULL, NULL, ?) \
                         ON CONFLICT (account_id) DO UPDATE SET \
                             is_active = 1, total_processed = 0, total_synced = 0, total_failed = 0, \
                             status = excluded.status, started_at = excluded.started_at, \
                             completed_at = NULL, error_message = NULL, updated_at = excluded.updated_at \
                         WHERE sync_statuses.is_active = 0",
                    )
                    .bind::<BigInt, _>(account_id)
                    .bind::<Text, _>(SyncState::Syncing.as_str())
                    .bind::<Timestamp, _>(ts)
                    .bind::<Timestamp, _>(ts)
                    .execute(conn)?;

                    if updated == 0 {
                        return Ok(None);
                    }

                    sync_statuses::table
                        .find(account_id)
                        .select(SyncStatusRow::as_select())
                        .first(conn)
                        .optional()
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(SyncStatus::try_from).transpose()
    }

    pub async fn get(&self, account_id: i64) -> Result<Option<SyncStatus>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let row: Option<SyncStatusRow> = conn
            .interact(move |conn| {
                sync_statuses::table
                    .find(account_id)
                    .select(SyncStatusRow::as_select())
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(SyncStatus::try_from).transpose()
    }

    /// Counts one processed item on an active sync. Returns false if no sync is active.
    pub async fn record_item(&self, account_id: i64, synced: bool) -> Result<bool, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let updated = conn
            .interact(move |conn| {
                let target = sync_statuses::table
                    .find(account_id)
                    .filter(sync_statuses::is_active.eq(true));
                let ts = now();
                if synced {
                    diesel::update(target)
                        .set((
                            sync_statuses::total_processed.eq(sync_statuses::total_processed + 1),
                            sync_statuses::total_synced.eq(sync_statuses::total_synced + 1),
                            sync_statuses::updated_at.eq(ts),
                        ))
                        .execute(conn)
                } else {
                    diesel::update(target)
                        .set((
                            sync_statuses::total_processed.eq(sync_statuses::total_processed + 1),
                            sync_statuses::total_failed.eq(sync_statuses::total_failed + 1),
                            sync_statuses::updated_at.eq(ts),
                        ))
                        .execute(conn)
                }
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(updated > 0)
    }

    /// Deactivates an active sync with a terminal state.
    pub async fn finish(
        &self,
        account_id: i64,
        state: SyncState,
        error_message: Option<String>,
    ) -> Result<Option<SyncStatus>, StoreError> {
        use diesel::connection::Connection;

        let conn = self.dal.database.get_connection().await?;
        let row: Option<SyncStatusRow> = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let ts = now();
                    let updated = diesel::update(
                        sync_statuses::table
                            .find(account_id)
                            .filter(sync_statuses::is_active.eq(true)),
                    )
                    .set((
                        sync_statuses::is_active.eq(false),
                        sync_statuses::status.eq(state.as_str()),
                        sync_statuses::completed_at.eq(Some(ts)),
                        sync_statuses::error_message.eq(error_message),
                        sync_statuses::updated_at.eq(ts),
                    ))
                    .execute(conn)?;

                    if updated == 0 {
                        return Ok(None);
                    }

                    sync_statuses::table
                        .find(account_id)
                        .select(SyncStatusRow::as_select())
                        .first(conn)
                        .optional()
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(SyncStatus::try_from).transpose()
    }

    /// Fails active syncs untouched since `stale_before`. Returns the affected accounts.
    pub async fn fail_stale(
        &self,
        stale_before: NaiveDateTime,
        error_message: &str,
    ) -> Result<Vec<i64>, StoreError> {
        use diesel::connection::Connection;

        let conn = self.dal.database.get_connection().await?;
        let error_message = error_message.to_string();
        let accounts = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let accounts: Vec<i64> = sync_statuses::table
                        .filter(sync_statuses::is_active.eq(true))
                        .filter(sync_statuses::updated_at.lt(stale_before))
                        .select(sync_statuses::account_id)
                        .load(conn)?;

                    let ts = now();
                    diesel::update(
                        sync_statuses::table.filter(sync_statuses::account_id.eq_any(&accounts)),
                    )
                    .set((
                        sync_statuses::is_active.eq(false),
                        sync_statuses::status.eq(SyncState::Failed.as_str()),
                        sync_statuses::completed_at.eq(Some(ts)),
                        sync_statuses::error_message.eq(Some(&error_message)),
                        sync_statuses::updated_at.eq(ts),
                    ))
                    .execute(conn)?;

                    Ok(accounts)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(accounts)
    }

    /// Sets `updated_at` directly; see [`super::generation_status::GenerationStatusDAL::touch`].
    pub async fn touch(&self, account_id: i64, updated_at: NaiveDateTime) -> Result<bool, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let updated = conn
            .interact(move |conn| {
                diesel::update(sync_statuses::table.find(account_id))
                    .set(sync_statuses::updated_at.eq(updated_at))
                    .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(updated > 0)
    }
}
