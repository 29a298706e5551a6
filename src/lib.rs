//! Cursor-based batch migration of document collections into relational
//! tables, with idempotent upserts keyed on the original object id.
//!
//! # Examples
//!
//! In-memory migration with [`core::migrator::BatchMigrator`]:
//! ```
//! use docmigrate::{
//!     core::migrator::{BatchMigrator, StartPoint},
//!     persist::memory::MemorySink,
//!     record::SourceRecord,
//!     schema::descriptor::{EntityDescriptor, FieldDescriptor, FieldKind},
//!     source::memory::MemorySource,
//!     types::ObjectId,
//! };
//! use serde_json::json;
//!
//! let entity = EntityDescriptor::new(
//!     "contract",
//!     "contracts",
//!     "contracts",
//!     vec![FieldDescriptor::new("tblock", FieldKind::Reference)],
//! );
//!
//! let mut source = MemorySource::new();
//! let id = ObjectId::parse_str("6465c438c6203f964096b4f2").expect("oid");
//! let fields = json!({ "tblock": { "$oid": "6465c438c6203f964096b4f1" } });
//! source.upsert("contracts", SourceRecord::new(id, fields.as_object().cloned().unwrap_or_default()));
//!
//! let mut migrator = BatchMigrator::new(source, MemorySink::new());
//! migrator.sync_schema(std::slice::from_ref(&entity)).expect("schema");
//! let report = migrator.migrate(&entity, 10, StartPoint::Beginning).expect("migrate");
//! assert_eq!(report.migrated, 1);
//! assert_eq!(report.fetches, 2);
//! ```
//!
//! Runtime usage with the SQLite sink:
//! ```no_run
//! use docmigrate::{
//!     persist::sqlite::SqliteRowSink,
//!     runtime::handle::{spawn_migration, EntityJob, RunPlan, RuntimeConfig},
//!     schema::catalog::Catalog,
//!     source::export::ExportDirSource,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let catalog = Catalog::builtin().expect("catalog");
//! let jobs = catalog.entities().iter().cloned().map(EntityJob::new).collect();
//! let source = ExportDirSource::open("dump/lattice").expect("open export");
//! let sink = SqliteRowSink::open("lattice.db").expect("open sqlite");
//! let handle = spawn_migration(source, sink, RunPlan::new(jobs), RuntimeConfig::default());
//! let summary = handle.join().await.expect("run");
//! println!("migrated {}", summary.total_migrated());
//! # }
//! ```

/// Run configuration file.
pub mod config;
/// Batch migrator.
pub mod core;
/// Destination-store abstraction, SQLite and in-memory implementations.
pub mod persist;
/// Source documents and destination rows.
pub mod record;
/// Background runtime handle and events.
pub mod runtime;
/// Entity descriptors, codecs, and transforms.
pub mod schema;
/// Origin-store abstraction, export-directory and in-memory implementations.
pub mod source;
/// Object ids and row ids.
pub mod types;
