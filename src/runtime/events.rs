//! Runtime event stream payloads.

use crate::{core::migrator::BatchProgress, types::ObjectId};

/// Events broadcast while a run plan executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationEvent {
    /// Destination tables were created or extended.
    SchemaSynced {
        /// Number of tables synced.
        tables: usize,
    },
    /// An entity migration began.
    EntityStarted {
        entity: String,
        batch_size: usize,
    },
    /// One batch was committed to the destination.
    BatchCommitted(BatchProgress),
    /// An entity migration completed.
    EntityFinished {
        entity: String,
        migrated: u64,
        inserted: u64,
        updated: u64,
        last_id: Option<ObjectId>,
    },
    /// The run stopped on an error.
    Failed {
        entity: Option<String>,
        message: String,
    },
    /// Every job in the plan completed.
    RunFinished {
        /// Records migrated across all entities.
        migrated: u64,
    },
}
