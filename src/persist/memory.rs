//! In-memory destination store.

use std::collections::BTreeMap;

use hashbrown::HashMap;

use crate::{
    record::TargetRow,
    schema::descriptor::TableSchema,
    types::RowId,
};

use super::{Checkpoint, PersistError, PersistResult, RowSink, UpsertBatch, UpsertOutcome};

/// Tables keyed by row id, plus checkpoints and a count of upsert calls.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    tables: HashMap<String, BTreeMap<RowId, TargetRow>>,
    schemas: HashMap<String, TableSchema>,
    checkpoints: HashMap<String, Checkpoint>,
    upsert_calls: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(&self, table: &str, id: &str) -> Option<&TargetRow> {
        self.tables.get(table)?.get(id)
    }

    /// Rows of `table` in id order.
    pub fn rows(&self, table: &str) -> Vec<&TargetRow> {
        self.tables
            .get(table)
            .map(|t| t.values().collect())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, BTreeMap::len)
    }

    pub fn schema(&self, table: &str) -> Option<&TableSchema> {
        self.schemas.get(table)
    }

    pub fn checkpoint(&self, entity: &str) -> Option<&Checkpoint> {
        self.checkpoints.get(entity)
    }

    /// Number of [`RowSink::upsert_batch`] calls that succeeded.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls
    }
}

impl RowSink for MemorySink {
    fn sync_schema(&mut self, tables: &[TableSchema]) -> PersistResult<()> {
        for schema in tables {
            self.tables.entry_ref(schema.table.as_str()).or_default();
            match self.schemas.get_mut(&schema.table) {
                Some(known) => {
                    for col in &schema.columns {
                        if !known.columns.iter().any(|c| c.name == col.name) {
                            known.columns.push(col.clone());
                        }
                    }
                }
                None => {
                    self.schemas.insert(schema.table.clone(), schema.clone());
                }
            }
        }
        Ok(())
    }

    fn upsert_batch(&mut self, batch: &UpsertBatch<'_>) -> PersistResult<UpsertOutcome> {
        let Some(table) = self.tables.get_mut(batch.table) else {
            return Err(PersistError::Message(format!("no such table: {}", batch.table)));
        };

        let mut outcome = UpsertOutcome::default();
        for row in batch.rows {
            match table.get_mut(&row.id) {
                Some(existing) => {
                    for col in batch.update_columns {
                        existing.values.insert(col.clone(), row.get(col).clone());
                    }
                    outcome.updated += 1;
                }
                None => {
                    let mut fresh = TargetRow::new(row.id.clone());
                    for col in batch.columns.iter().filter(|c| c.as_str() != batch.conflict_key) {
                        fresh.values.insert(col.clone(), row.get(col).clone());
                    }
                    table.insert(row.id.clone(), fresh);
                    outcome.inserted += 1;
                }
            }
        }

        if let Some(cp) = batch.checkpoint {
            self.checkpoints.insert(cp.entity.clone(), cp.clone());
        }
        self.upsert_calls += 1;
        Ok(outcome)
    }

    fn load_checkpoint(&mut self, entity: &str) -> PersistResult<Option<Checkpoint>> {
        Ok(self.checkpoints.get(entity).cloned())
    }
}
