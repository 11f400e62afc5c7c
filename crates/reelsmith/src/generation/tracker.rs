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

use tracing::info;

use crate::dal::DAL;
use crate::error::StatusError;
use crate::models::generation_status::GenerationStatus;

/// Settles generation batches once their last unit finishes.
///
/// Settlement is a conditional update on the batch (still active, nothing
/// queued or processing) followed by deletion of the batch's lock, in one
/// transaction. When several units finish at once only one caller wins; the
/// others get `None`.
#[derive(Clone, Debug)]
pub struct GenerationTracker {
    dal: DAL,
}

impl GenerationTracker {
    pub fn new(dal: DAL) -> Self {
        Self { dal }
    }

    /// Finalizes the batch if it has drained.
    ///
    /// A batch with no completed and at least one failed unit ends Failed;
    /// every other drained batch ends Completed.
    pub async fn settle(&self, status_id: &str) -> Result<Option<GenerationStatus>, StatusError> {
        let settled = self.dal.generation_status().settle(status_id).await?;
        if let Some(status) = &settled {
            info!(
                status_id = %status.id,
                account_id = status.account_id,
                content_type = %status.content_type,
                status = %status.status,
                completed = status.total_completed,
                failed = status.total_failed,
                "Generation settled"
            );
            metrics::counter!(
                "reelsmith_generations_settled_total",
                "status" => status.status.as_str()
            )
            .increment(1);
        }
        Ok(settled)
    }
}
