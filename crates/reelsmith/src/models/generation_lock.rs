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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exclusivity token for one `(account, content type)` pair.
///
/// The store holds at most one lock per pair. A lock lives from
/// [`crate::generation::GenerationLockService::acquire_lock`] until the batch
/// settles, it is released explicitly, or startup reconciliation finds it
/// without an active batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationLock {
    pub lock_id: String,
    pub account_id: i64,
    pub content_type: String,
    pub locked_at: DateTime<Utc>,
}
