pub mod memory;
pub mod sqlite;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    record::TargetRow,
    schema::descriptor::TableSchema,
    types::ObjectId,
};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0}")]
    Message(String),
}

pub type PersistResult<T> = Result<T, PersistError>;

/// Cursor position and running count for one entity, committed with its batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub entity: String,
    pub last_id: ObjectId,
    pub migrated: u64,
    pub updated_ms: u64,
}

/// One set-oriented insert-or-update request.
#[derive(Debug, Clone, Copy)]
pub struct UpsertBatch<'a> {
    pub table: &'a str,
    /// Column that decides insert vs update.
    pub conflict_key: &'a str,
    /// Columns written on insert, conflict key included.
    pub columns: &'a [String],
    /// Columns overwritten when the key already exists.
    pub update_columns: &'a [String],
    pub rows: &'a [TargetRow],
    /// Stored atomically with the rows when present.
    pub checkpoint: Option<&'a Checkpoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpsertOutcome {
    /// Rows whose key was not present before the batch.
    pub inserted: u64,
    /// Rows whose key was already present. Counted even when no column was
    /// overwritten, as with an entity made only of insert-only fields.
    pub updated: u64,
}

/// Destination store. Each [`RowSink::upsert_batch`] call succeeds or fails
/// as a whole.
pub trait RowSink: Send {
    /// Creates missing tables and columns; never drops anything.
    fn sync_schema(&mut self, tables: &[TableSchema]) -> PersistResult<()>;
    fn upsert_batch(&mut self, batch: &UpsertBatch<'_>) -> PersistResult<UpsertOutcome>;
    fn load_checkpoint(&mut self, _entity: &str) -> PersistResult<Option<Checkpoint>> {
        Ok(None)
    }
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
}

impl<K: RowSink + ?Sized> RowSink for Box<K> {
    fn sync_schema(&mut self, tables: &[TableSchema]) -> PersistResult<()> {
        (**self).sync_schema(tables)
    }

    fn upsert_batch(&mut self, batch: &UpsertBatch<'_>) -> PersistResult<UpsertOutcome> {
        (**self).upsert_batch(batch)
    }

    fn load_checkpoint(&mut self, entity: &str) -> PersistResult<Option<Checkpoint>> {
        (**self).load_checkpoint(entity)
    }

    fn flush(&mut self) -> PersistResult<()> {
        (**self).flush()
    }
}
