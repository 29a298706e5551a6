use std::{
    io,
    sync::{Arc, Mutex},
};

use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use docmigrate::{
    core::migrator::{BatchMigrator, MigrateError, PROGRESS_TARGET, StartPoint},
    persist::{
        PersistResult, RowSink, UpsertBatch, UpsertOutcome, memory::MemorySink,
    },
    record::{ColumnValue, SourceRecord},
    schema::descriptor::{EntityDescriptor, FieldDescriptor, FieldKind, TableSchema},
    source::{SourceResult, SourceStore, memory::MemorySource},
    types::ObjectId,
};

fn oid(n: u32) -> ObjectId {
    let mut bytes = [0u8; 12];
    bytes[..4].copy_from_slice(&0x6465_c438u32.to_be_bytes());
    bytes[8..].copy_from_slice(&n.to_be_bytes());
    ObjectId::from_bytes(bytes)
}

fn record(id: ObjectId, fields: Value) -> SourceRecord {
    SourceRecord::new(id, fields.as_object().cloned().expect("object"))
}

fn contract_entity() -> EntityDescriptor {
    EntityDescriptor::new(
        "contract",
        "contracts",
        "contracts",
        vec![
            FieldDescriptor::new("tblock", FieldKind::Reference),
            FieldDescriptor::new("name", FieldKind::Text),
            FieldDescriptor::new("_arguments", FieldKind::Json).with_default(json!([])),
            FieldDescriptor::new("createdAt", FieldKind::Timestamp).insert_only(),
        ],
    )
}

/// Records every cursor passed to `find_after`.
struct RecordingSource {
    inner: MemorySource,
    cursors: Vec<Option<ObjectId>>,
}

impl RecordingSource {
    fn new(inner: MemorySource) -> Self {
        Self {
            inner,
            cursors: Vec::new(),
        }
    }
}

impl SourceStore for RecordingSource {
    fn find_after(
        &mut self,
        collection: &str,
        cursor: Option<&ObjectId>,
        limit: usize,
    ) -> SourceResult<Vec<SourceRecord>> {
        self.cursors.push(cursor.copied());
        self.inner.find_after(collection, cursor, limit)
    }
}

/// Records the row ids of every upsert batch.
#[derive(Default)]
struct RecordingSink {
    inner: MemorySink,
    batches: Vec<Vec<String>>,
}

impl RowSink for RecordingSink {
    fn sync_schema(&mut self, tables: &[TableSchema]) -> PersistResult<()> {
        self.inner.sync_schema(tables)
    }

    fn upsert_batch(&mut self, batch: &UpsertBatch<'_>) -> PersistResult<UpsertOutcome> {
        self.batches
            .push(batch.rows.iter().map(|r| r.id.clone()).collect());
        self.inner.upsert_batch(batch)
    }
}

/// Ignores the cursor and always serves the same page.
struct StuckSource {
    page: Vec<SourceRecord>,
}

impl SourceStore for StuckSource {
    fn find_after(
        &mut self,
        _collection: &str,
        _cursor: Option<&ObjectId>,
        _limit: usize,
    ) -> SourceResult<Vec<SourceRecord>> {
        Ok(self.page.clone())
    }
}

fn seeded(n: u32) -> MemorySource {
    let mut src = MemorySource::new();
    for i in 1..=n {
        src.upsert(
            "contracts",
            record(oid(i), json!({ "name": format!("c{i}"), "tblock": { "$oid": oid(1000 + i).to_hex() } })),
        );
    }
    src
}

#[test]
fn three_records_in_batches_of_two() {
    let entity = contract_entity();
    let mut migrator = BatchMigrator::new(RecordingSource::new(seeded(3)), RecordingSink::default());
    migrator.sync_schema(std::slice::from_ref(&entity)).expect("schema");

    let report = migrator
        .migrate(&entity, 2, StartPoint::Beginning)
        .expect("migrate");

    assert_eq!(report.migrated, 3);
    assert_eq!(report.batches, 2);
    assert_eq!(report.fetches, 3);
    assert_eq!(report.last_id, Some(oid(3)));

    let (source, sink) = migrator.into_parts();
    assert_eq!(source.cursors, vec![None, Some(oid(2)), Some(oid(3))]);
    assert_eq!(
        sink.batches,
        vec![
            vec![oid(1).to_hex(), oid(2).to_hex()],
            vec![oid(3).to_hex()],
        ]
    );
}

#[test]
fn fetch_count_is_pages_plus_one() {
    let entity = contract_entity();
    for (n, batch) in [(0u32, 3usize), (1, 1), (5, 5), (6, 5), (10, 3), (7, 100)] {
        let mut migrator = BatchMigrator::new(seeded(n), MemorySink::new());
        migrator.sync_schema(std::slice::from_ref(&entity)).expect("schema");
        let report = migrator
            .migrate(&entity, batch, StartPoint::Beginning)
            .expect("migrate");

        let pages = (n as u64).div_ceil(batch as u64);
        assert_eq!(report.fetches, pages + 1, "n={n} batch={batch}");
        assert_eq!(report.batches, pages);
        assert_eq!(report.migrated, u64::from(n));
        assert_eq!(migrator.sink().row_count("contracts"), n as usize);
    }
}

#[test]
fn cursors_strictly_increase() {
    let entity = contract_entity();
    let mut migrator = BatchMigrator::new(RecordingSource::new(seeded(9)), MemorySink::new());
    migrator.sync_schema(std::slice::from_ref(&entity)).expect("schema");
    migrator
        .migrate(&entity, 2, StartPoint::Beginning)
        .expect("migrate");

    let cursors: Vec<ObjectId> = migrator.source().cursors.iter().flatten().copied().collect();
    assert!(cursors.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn stuck_source_is_reported_not_looped() {
    let entity = contract_entity();
    let source = StuckSource {
        page: vec![record(oid(1), json!({})), record(oid(2), json!({}))],
    };
    let mut migrator = BatchMigrator::new(source, MemorySink::new());
    migrator.sync_schema(std::slice::from_ref(&entity)).expect("schema");

    let err = migrator
        .migrate(&entity, 2, StartPoint::Beginning)
        .expect_err("must fail");
    assert!(matches!(
        err,
        MigrateError::CursorRegression { cursor, got, .. } if cursor == oid(2) && got == oid(1)
    ));
    // The first page was committed before the regression was seen.
    assert_eq!(migrator.sink().row_count("contracts"), 2);
}

#[test]
fn zero_batch_size_is_rejected() {
    let entity = contract_entity();
    let mut migrator = BatchMigrator::new(seeded(1), MemorySink::new());
    let err = migrator
        .migrate(&entity, 0, StartPoint::Beginning)
        .expect_err("must fail");
    assert!(matches!(err, MigrateError::InvalidBatchSize { .. }));
}

#[test]
fn null_and_absent_references_become_null() {
    let entity = contract_entity();
    let mut src = MemorySource::new();
    src.upsert("contracts", record(oid(1), json!({ "tblock": null, "name": "x" })));
    src.upsert("contracts", record(oid(2), json!({ "name": "y" })));

    let mut migrator = BatchMigrator::new(src, MemorySink::new());
    migrator.sync_schema(std::slice::from_ref(&entity)).expect("schema");
    let report = migrator
        .migrate(&entity, 10, StartPoint::Beginning)
        .expect("migrate");
    assert_eq!(report.migrated, 2);

    for id in [oid(1), oid(2)] {
        let row = migrator.sink().row("contracts", &id.to_hex()).expect("row");
        assert_eq!(row.get("tblock"), &ColumnValue::Null);
        assert_eq!(row.get("_arguments"), &ColumnValue::Text("[]".to_string()));
    }
}

#[test]
fn rerun_updates_everything_and_inserts_nothing() {
    let entity = contract_entity();
    let mut migrator = BatchMigrator::new(seeded(7), MemorySink::new());
    migrator.sync_schema(std::slice::from_ref(&entity)).expect("schema");

    let first = migrator
        .migrate(&entity, 3, StartPoint::Beginning)
        .expect("first");
    assert_eq!((first.inserted, first.updated), (7, 0));
    let before: Vec<_> = migrator.sink().rows("contracts").into_iter().cloned().collect();

    let second = migrator
        .migrate(&entity, 3, StartPoint::Beginning)
        .expect("second");
    assert_eq!((second.inserted, second.updated), (0, 7));
    let after: Vec<_> = migrator.sink().rows("contracts").into_iter().cloned().collect();
    assert_eq!(before, after);
}

#[test]
fn row_ids_are_deterministic_across_runs() {
    let entity = contract_entity();
    let run = || {
        let mut migrator = BatchMigrator::new(seeded(5), MemorySink::new());
        migrator.sync_schema(std::slice::from_ref(&entity)).expect("schema");
        migrator
            .migrate(&entity, 2, StartPoint::Beginning)
            .expect("migrate");
        migrator
            .sink()
            .rows("contracts")
            .into_iter()
            .cloned()
            .collect::<Vec<_>>()
    };
    let a = run();
    let b = run();
    assert_eq!(a, b);
    assert_eq!(a[0].id, oid(1).to_hex());
    assert_eq!(a[0].get("tblock"), &ColumnValue::Text(oid(1001).to_hex()));
}

#[test]
fn insert_only_column_survives_updates() {
    let entity = contract_entity();
    let mut src = MemorySource::new();
    src.upsert("contracts", record(oid(1), json!({ "name": "old", "createdAt": 1000 })));

    let mut migrator = BatchMigrator::new(src, MemorySink::new());
    migrator.sync_schema(std::slice::from_ref(&entity)).expect("schema");
    migrator
        .migrate(&entity, 10, StartPoint::Beginning)
        .expect("first");

    let (mut src, sink) = migrator.into_parts();
    src.upsert("contracts", record(oid(1), json!({ "name": "new", "createdAt": 2000 })));
    let mut migrator = BatchMigrator::new(src, sink);
    let report = migrator
        .migrate(&entity, 10, StartPoint::Beginning)
        .expect("second");
    assert_eq!(report.updated, 1);

    let row = migrator.sink().row("contracts", &oid(1).to_hex()).expect("row");
    assert_eq!(row.get("name"), &ColumnValue::Text("new".to_string()));
    assert_eq!(row.get("createdAt"), &ColumnValue::Integer(1000));
}

#[test]
fn start_after_skips_earlier_records() {
    let entity = contract_entity();
    let mut migrator = BatchMigrator::new(seeded(5), MemorySink::new());
    migrator.sync_schema(std::slice::from_ref(&entity)).expect("schema");
    let report = migrator
        .migrate(&entity, 2, StartPoint::After(oid(3)))
        .expect("migrate");

    assert_eq!(report.migrated, 2);
    assert!(migrator.sink().row("contracts", &oid(3).to_hex()).is_none());
    assert!(migrator.sink().row("contracts", &oid(4).to_hex()).is_some());
}

#[test]
fn checkpoint_resume_continues_after_last_batch() {
    let entity = contract_entity();
    let mut migrator = BatchMigrator::new(seeded(4), MemorySink::new()).with_checkpoints(true);
    migrator.sync_schema(std::slice::from_ref(&entity)).expect("schema");
    migrator
        .migrate(&entity, 3, StartPoint::Beginning)
        .expect("first");

    let cp = migrator.sink().checkpoint("contract").cloned().expect("checkpoint");
    assert_eq!(cp.last_id, oid(4));
    assert_eq!(cp.migrated, 4);

    let (mut src, sink) = migrator.into_parts();
    for i in 5..=6 {
        src.upsert("contracts", record(oid(i), json!({ "name": format!("c{i}") })));
    }
    assert_eq!(src.len("contracts"), 6);
    let mut migrator = BatchMigrator::new(RecordingSource::new(src), sink).with_checkpoints(true);
    let report = migrator
        .migrate(&entity, 3, StartPoint::Checkpoint)
        .expect("resume");

    assert_eq!(report.migrated, 2);
    assert_eq!(report.inserted, 2);
    assert_eq!(migrator.source().cursors.first(), Some(&Some(oid(4))));
    let cp = migrator.sink().checkpoint("contract").expect("checkpoint");
    assert_eq!(cp.last_id, oid(6));
    assert_eq!(cp.migrated, 6);
}

#[test]
fn checkpoint_start_without_checkpoint_begins_at_start() {
    let entity = contract_entity();
    let mut migrator = BatchMigrator::new(seeded(3), MemorySink::new()).with_checkpoints(true);
    migrator.sync_schema(std::slice::from_ref(&entity)).expect("schema");
    let report = migrator
        .migrate(&entity, 2, StartPoint::Checkpoint)
        .expect("migrate");
    assert_eq!(report.migrated, 3);
}

#[test]
fn progress_callback_sees_every_batch() {
    let entity = contract_entity();
    let mut migrator = BatchMigrator::new(seeded(5), MemorySink::new());
    migrator.sync_schema(std::slice::from_ref(&entity)).expect("schema");

    let mut seen = Vec::new();
    migrator
        .migrate_with(&entity, 2, StartPoint::Beginning, |p| {
            seen.push((p.batch, p.batch_len, p.migrated, p.cursor));
        })
        .expect("migrate");

    assert_eq!(
        seen,
        vec![(1, 2, 2, oid(2)), (2, 2, 4, oid(4)), (3, 1, 5, oid(5))]
    );
}

/// Collects formatted log output in memory.
#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    fn lines(&self) -> Vec<String> {
        let buf = self.0.lock().expect("lock");
        String::from_utf8_lossy(&buf)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect()
    }
}

impl io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn progress_line_reports_entity_count_and_cursor() {
    let log = CapturedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(format!("{PROGRESS_TARGET}=info")))
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .without_time()
        .with_level(false)
        .with_target(false)
        .finish();

    let entity = contract_entity();
    tracing::subscriber::with_default(subscriber, || {
        let mut migrator = BatchMigrator::new(seeded(3), MemorySink::new());
        migrator.sync_schema(std::slice::from_ref(&entity)).expect("schema");
        migrator
            .migrate(&entity, 2, StartPoint::Beginning)
            .expect("migrate");
    });

    assert_eq!(
        log.lines(),
        vec![
            format!("contract 2 {}", oid(2)),
            format!("contract 3 {}", oid(3)),
        ]
    );
}
