//! docmigrate CLI: copy exported collections into SQLite.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tracing::warn;

use docmigrate::{
    config::MigrateConfig,
    persist::sqlite::{SqliteRowSink, create_table_sql},
    runtime::handle::{RuntimeConfig, spawn_migration},
    schema::catalog::Catalog,
    source::export::ExportDirSource,
};

#[derive(Parser)]
#[command(name = "docmigrate", version, about = "Batch-migrate document collections into SQLite")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate every configured entity.
    Run {
        /// Run configuration file.
        #[arg(long, default_value = "migrate.toml")]
        config: PathBuf,

        /// Restrict the run to these entities (comma-separated).
        #[arg(long, value_delimiter = ',')]
        only: Option<Vec<String>>,

        /// Overrides `[source] export_dir`.
        #[arg(long)]
        export_dir: Option<PathBuf>,

        /// Overrides `[destination] sqlite_path`.
        #[arg(long)]
        sqlite: Option<PathBuf>,
    },

    /// List entity descriptors.
    Entities {
        /// Catalog file; the built-in catalog otherwise.
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Print destination DDL.
    Schema {
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Show persisted cursor checkpoints.
    Checkpoints {
        #[arg(long)]
        sqlite: PathBuf,

        /// Forget the checkpoints of these entities so the next resume starts over.
        #[arg(long, value_delimiter = ',')]
        clear: Option<Vec<String>>,
    },
}

fn load_catalog(path: Option<PathBuf>) -> Result<Catalog> {
    match path {
        Some(path) => Catalog::load(path).into_diagnostic(),
        None => Catalog::builtin().into_diagnostic(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            only,
            export_dir,
            sqlite,
        } => {
            let mut cfg = MigrateConfig::load(&config).into_diagnostic()?;
            if export_dir.is_some() {
                cfg.source.export_dir = export_dir;
            }
            if sqlite.is_some() {
                cfg.destination.sqlite_path = sqlite;
            }

            let catalog = cfg.load_catalog().into_diagnostic()?;
            let plan = cfg.build_plan(&catalog, only.as_deref()).into_diagnostic()?;
            if plan.jobs.is_empty() {
                warn!(config = %config.display(), "no entities selected, nothing to do");
                return Ok(());
            }

            let Some(dir) = cfg.source.export_dir.as_ref() else {
                miette::bail!("no export directory: set [source] export_dir or pass --export-dir");
            };
            let Some(db) = cfg.destination.sqlite_path.as_ref() else {
                miette::bail!("no destination: set [destination] sqlite_path or pass --sqlite");
            };

            let source = ExportDirSource::open(dir).into_diagnostic()?;
            let sink = SqliteRowSink::open(db).into_diagnostic()?;
            let runtime = RuntimeConfig {
                checkpoints: cfg.checkpoints,
                ..RuntimeConfig::default()
            };

            let summary = spawn_migration(source, sink, plan, runtime)
                .join()
                .await
                .into_diagnostic()?;

            println!("{:<16} {:>10} {:>10} {:>10}", "entity", "migrated", "inserted", "updated");
            for r in &summary.reports {
                println!("{:<16} {:>10} {:>10} {:>10}", r.entity, r.migrated, r.inserted, r.updated);
            }
            println!("total: {}", summary.total_migrated());
        }

        Commands::Entities { catalog } => {
            let catalog = load_catalog(catalog)?;
            for e in catalog.entities() {
                println!(
                    "{:<16} {:<18} -> {:<18} batch={:<5} fields={}",
                    e.name,
                    e.collection,
                    e.table,
                    e.batch_size,
                    e.fields.len()
                );
            }
        }

        Commands::Schema { catalog } => {
            let catalog = load_catalog(catalog)?;
            for e in catalog.entities() {
                println!("{}\n", create_table_sql(&e.table_schema()));
            }
        }

        Commands::Checkpoints { sqlite, clear } => {
            if !sqlite.exists() {
                miette::bail!("database {} does not exist", sqlite.display());
            }
            let mut sink = SqliteRowSink::open(&sqlite).into_diagnostic()?;
            for entity in clear.unwrap_or_default() {
                if sink.clear_checkpoint(&entity).into_diagnostic()? {
                    println!("cleared {entity}");
                } else {
                    warn!(entity = %entity, "no checkpoint to clear");
                }
            }

            let checkpoints = sink.checkpoints().into_diagnostic()?;
            if checkpoints.is_empty() {
                println!("no checkpoints");
            }
            for cp in checkpoints {
                println!(
                    "{:<16} last_id={} migrated={} updated_ms={}",
                    cp.entity, cp.last_id, cp.migrated, cp.updated_ms
                );
            }
        }
    }

    Ok(())
}
