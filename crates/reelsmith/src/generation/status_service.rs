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

//! Generation Status Service
//!
//! Creates and mutates per-batch progress records. Every counter change is a
//! single conditional `UPDATE`, so counters never go negative and their sum
//! always equals the number of units submitted.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::dal::generation_status::CounterTransition;
use crate::dal::models::cutoff;
use crate::dal::DAL;
use crate::error::StatusError;
use crate::models::generation_status::{GenerationState, GenerationStatus};

#[derive(Clone, Debug)]
pub struct GenerationStatusService {
    dal: DAL,
}

impl GenerationStatusService {
    pub fn new(dal: DAL) -> Self {
        Self { dal }
    }

    /// Creates a Queuing batch with zeroed counters.
    pub async fn create_status(
        &self,
        account_id: i64,
        content_type: &str,
        lock_id: Option<&str>,
    ) -> Result<GenerationStatus, StatusError> {
        let status = self
            .dal
            .generation_status()
            .create(account_id, content_type, lock_id)
            .await?;
        info!(
            account_id,
            content_type,
            status_id = %status.id,
            "Generation status created"
        );
        Ok(status)
    }

    pub async fn get_status(&self, status_id: &str) -> Result<GenerationStatus, StatusError> {
        self.dal
            .generation_status()
            .get(status_id)
            .await?
            .ok_or_else(|| StatusError::NotFound(status_id.to_string()))
    }

    /// The running batch for a pair, if any.
    pub async fn find_active(
        &self,
        account_id: i64,
        content_type: &str,
    ) -> Result<Option<GenerationStatus>, StatusError> {
        Ok(self
            .dal
            .generation_status()
            .find_active(account_id, content_type)
            .await?)
    }

    pub async fn increment_queued(&self, status_id: &str) -> Result<(), StatusError> {
        self.apply(status_id, CounterTransition::Queued(1)).await
    }

    /// Moves one unit from queued to processing (queued only decremented if > 0).
    pub async fn increment_processing(&self, status_id: &str) -> Result<(), StatusError> {
        self.apply(status_id, CounterTransition::Processing).await
    }

    /// Moves one unit from processing to completed (processing only decremented if > 0).
    pub async fn increment_completed(&self, status_id: &str) -> Result<(), StatusError> {
        self.apply(status_id, CounterTransition::Completed).await
    }

    /// Moves one unit from processing to failed (processing only decremented if > 0).
    pub async fn increment_failed(&self, status_id: &str) -> Result<(), StatusError> {
        self.apply(status_id, CounterTransition::Failed).await
    }

    /// Applies an arbitrary counter transition.
    pub async fn apply(
        &self,
        status_id: &str,
        transition: CounterTransition,
    ) -> Result<(), StatusError> {
        if !self
            .dal
            .generation_status()
            .apply(status_id, transition)
            .await?
        {
            return Err(StatusError::NotFound(status_id.to_string()));
        }
        debug!(status_id, ?transition, "Generation counters updated");
        Ok(())
    }

    /// Marks a batch Completed. The caller is expected to have checked that
    /// nothing is queued or processing.
    pub async fn mark_completed(&self, status_id: &str) -> Result<(), StatusError> {
        self.set_terminal(status_id, GenerationState::Completed).await
    }

    pub async fn mark_failed(&self, status_id: &str) -> Result<(), StatusError> {
        self.set_terminal(status_id, GenerationState::Failed).await
    }

    async fn set_terminal(&self, status_id: &str, state: GenerationState) -> Result<(), StatusError> {
        if !self
            .dal
            .generation_status()
            .set_terminal(status_id, state)
            .await?
        {
            return Err(StatusError::NotFound(status_id.to_string()));
        }
        info!(status_id, status = %state, "Generation status finalized");
        Ok(())
    }

    /// Forces batches that stopped progressing to Failed.
    ///
    /// A Queuing or Processing batch whose `updated_at` is older than
    /// `stuck_duration` is considered stuck. Safe to run repeatedly: a second
    /// pass finds nothing. Returns the number of batches fixed.
    pub async fn reconcile_stuck_statuses(
        &self,
        stuck_duration: Duration,
    ) -> Result<usize, StatusError> {
        let fixed = self
            .dal
            .generation_status()
            .fail_stale(cutoff(stuck_duration))
            .await?;
        for status in &fixed {
            warn!(
                status_id = %status.id,
                account_id = status.account_id,
                content_type = %status.content_type,
                previous = %status.status,
                updated_at = %status.updated_at,
                "Stuck generation status forced to Failed"
            );
        }
        info!(fixed = fixed.len(), "Generation status reconciliation complete");
        Ok(fixed.len())
    }
}
