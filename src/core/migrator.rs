use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    persist::{Checkpoint, PersistError, RowSink, UpsertBatch},
    record::SourceRecord,
    schema::{
        descriptor::EntityDescriptor,
        transform::{TransformError, transform_batch},
    },
    source::{SourceError, SourceStore},
    types::{ObjectId, ROW_ID_COLUMN},
};

/// Target of the per-batch progress line.
pub const PROGRESS_TARGET: &str = "docmigrate::progress";

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("batch size must be positive (entity `{entity}`)")]
    InvalidBatchSize { entity: String },
    #[error("origin store: {0}")]
    Source(#[from] SourceError),
    #[error("destination store: {0}")]
    Persist(#[from] PersistError),
    #[error("transform: {0}")]
    Transform(#[from] TransformError),
    #[error("entity `{entity}`: origin returned {got} at or before cursor {cursor}")]
    CursorRegression {
        entity: String,
        cursor: ObjectId,
        got: ObjectId,
    },
}

/// Where a migration begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StartPoint {
    #[default]
    Beginning,
    /// Resume strictly after the given id.
    After(ObjectId),
    /// Resume after the sink's stored checkpoint, or from the beginning.
    Checkpoint,
}

/// Emitted after each committed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub entity: String,
    pub batch: u64,
    pub batch_len: usize,
    pub inserted: u64,
    pub updated: u64,
    /// Records migrated so far in this run.
    pub migrated: u64,
    pub cursor: ObjectId,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MigrationReport {
    pub entity: String,
    pub migrated: u64,
    pub inserted: u64,
    pub updated: u64,
    pub batches: u64,
    /// Origin queries issued, including the final empty one.
    pub fetches: u64,
    pub last_id: Option<ObjectId>,
}

/// Copies one entity type at a time from `S` into `K`, page by page.
///
/// Each page is transformed and written with a single upsert before the
/// cursor moves, so an interrupted run never skips records.
pub struct BatchMigrator<S, K> {
    source: S,
    sink: K,
    checkpoints: bool,
}

impl<S: SourceStore, K: RowSink> BatchMigrator<S, K> {
    pub fn new(source: S, sink: K) -> Self {
        Self {
            source,
            sink,
            checkpoints: false,
        }
    }

    /// Builder: commit a [`Checkpoint`] with every batch.
    pub fn with_checkpoints(mut self, enabled: bool) -> Self {
        self.checkpoints = enabled;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn into_parts(self) -> (S, K) {
        (self.source, self.sink)
    }

    /// Creates destination tables for `entities`.
    pub fn sync_schema(&mut self, entities: &[EntityDescriptor]) -> Result<(), MigrateError> {
        let tables: Vec<_> = entities.iter().map(EntityDescriptor::table_schema).collect();
        self.sink.sync_schema(&tables)?;
        info!(tables = tables.len(), "destination schema synced");
        Ok(())
    }

    pub fn migrate(
        &mut self,
        entity: &EntityDescriptor,
        batch_size: usize,
        start: StartPoint,
    ) -> Result<MigrationReport, MigrateError> {
        self.migrate_with(entity, batch_size, start, |_| {})
    }

    /// Like [`Self::migrate`], calling `on_batch` after every committed batch.
    pub fn migrate_with<F>(
        &mut self,
        entity: &EntityDescriptor,
        batch_size: usize,
        start: StartPoint,
        mut on_batch: F,
    ) -> Result<MigrationReport, MigrateError>
    where
        F: FnMut(&BatchProgress),
    {
        if batch_size == 0 {
            return Err(MigrateError::InvalidBatchSize {
                entity: entity.name.clone(),
            });
        }

        // Checkpoint counts carry across resumed runs.
        let (mut cursor, mut carried) = self.resolve_start(entity, start)?;
        let mut report = MigrationReport {
            entity: entity.name.clone(),
            ..MigrationReport::default()
        };

        let columns = entity.columns();
        let update_columns = entity.update_columns();
        debug!(entity = %entity.name, cursor = ?cursor, batch_size, "migration started");

        loop {
            let page = self
                .source
                .find_after(&entity.collection, cursor.as_ref(), batch_size)?;
            report.fetches += 1;
            let Some(last) = page.last() else {
                break;
            };
            let last_id = last.id;
            check_order(&entity.name, cursor, &page)?;

            let rows = transform_batch(entity, &page)?;
            carried += rows.len() as u64;
            let checkpoint = self.checkpoints.then(|| Checkpoint {
                entity: entity.name.clone(),
                last_id,
                migrated: carried,
                updated_ms: now_ms(),
            });

            let outcome = self.sink.upsert_batch(&UpsertBatch {
                table: &entity.table,
                conflict_key: ROW_ID_COLUMN,
                columns: &columns,
                update_columns: &update_columns,
                rows: &rows,
                checkpoint: checkpoint.as_ref(),
            })?;

            cursor = Some(last_id);
            report.batches += 1;
            report.migrated += rows.len() as u64;
            report.inserted += outcome.inserted;
            report.updated += outcome.updated;
            report.last_id = Some(last_id);

            info!(target: PROGRESS_TARGET, "{} {} {}", entity.name, report.migrated, last_id);
            on_batch(&BatchProgress {
                entity: entity.name.clone(),
                batch: report.batches,
                batch_len: rows.len(),
                inserted: outcome.inserted,
                updated: outcome.updated,
                migrated: report.migrated,
                cursor: last_id,
            });
        }

        self.sink.flush()?;
        info!(
            entity = %entity.name,
            migrated = report.migrated,
            inserted = report.inserted,
            updated = report.updated,
            batches = report.batches,
            "migration finished"
        );
        Ok(report)
    }

    fn resolve_start(
        &mut self,
        entity: &EntityDescriptor,
        start: StartPoint,
    ) -> Result<(Option<ObjectId>, u64), MigrateError> {
        Ok(match start {
            StartPoint::Beginning => (None, 0),
            StartPoint::After(id) => (Some(id), 0),
            StartPoint::Checkpoint => {
                let cp = self.sink.load_checkpoint(&entity.name)?;
                match &cp {
                    Some(cp) => info!(entity = %entity.name, last_id = %cp.last_id, migrated = cp.migrated, "resuming from checkpoint"),
                    None => debug!(entity = %entity.name, "no checkpoint, starting from the beginning"),
                }
                cp.map_or((None, 0), |cp| (Some(cp.last_id), cp.migrated))
            }
        })
    }
}

/// Page ids must be strictly ascending and strictly after `cursor`.
fn check_order(
    entity: &str,
    cursor: Option<ObjectId>,
    page: &[SourceRecord],
) -> Result<(), MigrateError> {
    let mut prev = cursor;
    for rec in page {
        if let Some(p) = prev {
            if rec.id <= p {
                return Err(MigrateError::CursorRegression {
                    entity: entity.to_string(),
                    cursor: p,
                    got: rec.id,
                });
            }
        }
        prev = Some(rec.id);
    }
    Ok(())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
