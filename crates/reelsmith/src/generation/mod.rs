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

//! Generation batches: exclusivity locks, progress tracking, settlement and
//! the request-level orchestrator tying them to the task queue.

pub mod lock_service;
pub mod orchestrator;
pub mod status_service;
pub mod tracker;

pub use lock_service::GenerationLockService;
pub use orchestrator::{GenerationHandle, GenerationOrchestrator};
pub use status_service::GenerationStatusService;
pub use tracker::GenerationTracker;
