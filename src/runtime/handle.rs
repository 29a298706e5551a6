use thiserror::Error;
use tokio::{
    sync::broadcast,
    task::{JoinError, JoinHandle},
};
use tracing::{error, info};

use crate::{
    core::migrator::{BatchMigrator, MigrateError, MigrationReport, StartPoint},
    persist::RowSink,
    schema::descriptor::EntityDescriptor,
    source::SourceStore,
};

use super::events::MigrationEvent;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("schema sync failed: {0}")]
    Schema(#[source] MigrateError),
    #[error("migrating `{entity}` failed: {source}")]
    Entity {
        entity: String,
        #[source]
        source: MigrateError,
    },
    #[error("migration worker did not complete: {0}")]
    Join(#[from] JoinError),
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Broadcast buffer; slow subscribers see `Lagged` past this.
    pub event_capacity: usize,
    /// Commit a checkpoint with every batch.
    pub checkpoints: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            checkpoints: true,
        }
    }
}

/// One entity migration within a plan.
#[derive(Debug, Clone)]
pub struct EntityJob {
    pub entity: EntityDescriptor,
    pub batch_size: usize,
    pub start: StartPoint,
}

impl EntityJob {
    /// Job from the beginning with the descriptor's own batch size.
    pub fn new(entity: EntityDescriptor) -> Self {
        Self {
            batch_size: entity.batch_size,
            entity,
            start: StartPoint::Beginning,
        }
    }
}

/// Ordered entity jobs, run one after another.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub jobs: Vec<EntityJob>,
    /// Sync destination tables for every job before the first migration.
    pub sync_schema: bool,
}

impl RunPlan {
    pub fn new(jobs: Vec<EntityJob>) -> Self {
        Self {
            jobs,
            sync_schema: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub reports: Vec<MigrationReport>,
}

impl RunSummary {
    pub fn total_migrated(&self) -> u64 {
        self.reports.iter().map(|r| r.migrated).sum()
    }
}

pub struct MigrationHandle {
    events_tx: broadcast::Sender<MigrationEvent>,
    initial_rx: Option<broadcast::Receiver<MigrationEvent>>,
    task: JoinHandle<Result<RunSummary, RuntimeError>>,
}

impl MigrationHandle {
    /// Receiver for events sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MigrationEvent> {
        self.events_tx.subscribe()
    }

    /// Receiver created before the worker started; sees every event.
    /// Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<broadcast::Receiver<MigrationEvent>> {
        self.initial_rx.take()
    }

    /// Waits for the plan to finish.
    pub async fn join(self) -> Result<RunSummary, RuntimeError> {
        self.task.await?
    }
}

/// Runs `plan` on a blocking worker thread.
///
/// `source` and `sink` move into the worker and are dropped when the run
/// ends, whether it succeeded or not.
pub fn spawn_migration<S, K>(
    source: S,
    sink: K,
    plan: RunPlan,
    config: RuntimeConfig,
) -> MigrationHandle
where
    S: SourceStore + 'static,
    K: RowSink + 'static,
{
    let (events_tx, initial_rx) = broadcast::channel::<MigrationEvent>(config.event_capacity.max(1));
    let worker_tx = events_tx.clone();
    let task = tokio::task::spawn_blocking(move || run_plan(source, sink, &plan, &config, &worker_tx));

    MigrationHandle {
        events_tx,
        initial_rx: Some(initial_rx),
        task,
    }
}

/// Runs `plan` on the current thread.
pub fn run_plan<S: SourceStore, K: RowSink>(
    source: S,
    sink: K,
    plan: &RunPlan,
    config: &RuntimeConfig,
    events: &broadcast::Sender<MigrationEvent>,
) -> Result<RunSummary, RuntimeError> {
    let mut migrator = BatchMigrator::new(source, sink).with_checkpoints(config.checkpoints);

    if plan.sync_schema {
        let entities: Vec<EntityDescriptor> = plan.jobs.iter().map(|j| j.entity.clone()).collect();
        if let Err(err) = migrator.sync_schema(&entities) {
            error!(error = %err, "schema sync failed");
            let _ = events.send(MigrationEvent::Failed {
                entity: None,
                message: err.to_string(),
            });
            return Err(RuntimeError::Schema(err));
        }
        let _ = events.send(MigrationEvent::SchemaSynced {
            tables: entities.len(),
        });
    }

    let mut summary = RunSummary::default();
    for job in &plan.jobs {
        let _ = events.send(MigrationEvent::EntityStarted {
            entity: job.entity.name.clone(),
            batch_size: job.batch_size,
        });

        let result = migrator.migrate_with(&job.entity, job.batch_size, job.start, |progress| {
            let _ = events.send(MigrationEvent::BatchCommitted(progress.clone()));
        });

        match result {
            Ok(report) => {
                let _ = events.send(MigrationEvent::EntityFinished {
                    entity: report.entity.clone(),
                    migrated: report.migrated,
                    inserted: report.inserted,
                    updated: report.updated,
                    last_id: report.last_id,
                });
                summary.reports.push(report);
            }
            Err(source) => {
                error!(entity = %job.entity.name, error = %source, "migration failed");
                let _ = events.send(MigrationEvent::Failed {
                    entity: Some(job.entity.name.clone()),
                    message: source.to_string(),
                });
                return Err(RuntimeError::Entity {
                    entity: job.entity.name.clone(),
                    source,
                });
            }
        }
    }

    info!(entities = summary.reports.len(), migrated = summary.total_migrated(), "run finished");
    let _ = events.send(MigrationEvent::RunFinished {
        migrated: summary.total_migrated(),
    });
    Ok(summary)
}
