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

//! The unit of work a worker performs for one task.

use async_trait::async_trait;

use crate::error::RenderError;
use crate::models::task::Task;

/// Renders one task's payload.
///
/// Implementations must be safe to call from several workers at once. Any
/// error is treated as transient and the task is retried with backoff until
/// its retry budget is spent. The worker pool bounds every call with the
/// configured task timeout, so implementations need not time themselves out.
///
/// ```rust,ignore
/// struct VideoRenderer { client: RenderClient }
///
/// #[async_trait]
/// impl Renderer for VideoRenderer {
///     async fn render(&self, task: &Task) -> Result<(), RenderError> {
///         self.client
///             .render(&task.payload)
///             .await
///             .map_err(|e| RenderError::Failed(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, task: &Task) -> Result<(), RenderError>;
}
