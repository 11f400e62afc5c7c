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

//! Data Access Layer
//!
//! Every read and write against the store goes through [`DAL`]. Each entity
//! gets a borrowed view (`dal.task()`, `dal.generation_status()`, ...) whose
//! async methods take a pooled connection, run their statements inside
//! `interact`, and map failures into [`crate::error::StoreError`].
//!
//! Multi-row state changes run in a single transaction so that a task's
//! status and its batch's counters never disagree.

pub mod generation_lock;
pub mod generation_status;
pub mod models;
pub mod sync_status;
pub mod task;

use crate::database::Database;

use generation_lock::GenerationLockDAL;
use generation_status::GenerationStatusDAL;
use sync_status::SyncStatusDAL;
use task::TaskDAL;

/// The main Data Access Layer struct.
#[derive(Clone, Debug)]
pub struct DAL {
    /// Pooled database handle shared by every entity view.
    pub database: Database,
}

impl DAL {
    /// Creates a new DAL instance over the provided database.
    pub fn new(database: Database) -> Self {
        DAL { database }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn task(&self) -> TaskDAL<'_> {
        TaskDAL::new(self)
    }

    pub fn generation_lock(&self) -> GenerationLockDAL<'_> {
        GenerationLockDAL::new(self)
    }

    pub fn generation_status(&self) -> GenerationStatusDAL<'_> {
        GenerationStatusDAL::new(self)
    }

    pub fn sync_status(&self) -> SyncStatusDAL<'_> {
        SyncStatusDAL::new(self)
    }
}
