use std::fs;

use serde_json::json;
use tempfile::TempDir;

use docmigrate::{
    core::migrator::{BatchMigrator, StartPoint},
    persist::memory::MemorySink,
    record::ColumnValue,
    schema::catalog::Catalog,
    source::{SourceError, SourceStore, export::ExportDirSource},
    types::ObjectId,
};

const A: &str = "6465c438c6203f964096b4f1";
const B: &str = "6465c438c6203f964096b4f2";
const C: &str = "6465c438c6203f964096b4f3";

fn oid(hex: &str) -> ObjectId {
    ObjectId::parse_str(hex).expect("oid")
}

#[test]
fn json_lines_export_is_served_in_id_order() {
    let tmp = TempDir::new().expect("tmp");
    // Written out of order on purpose.
    let lines = [
        json!({ "_id": { "$oid": C }, "chainId": { "$numberLong": "3" } }),
        json!({ "_id": { "$oid": A }, "chainId": { "$numberInt": "1" } }),
        json!({ "_id": B, "chainId": 2 }),
    ];
    let text: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    fs::write(tmp.path().join("chains.json"), text.join("\n") + "\n\n").expect("write");

    let mut source = ExportDirSource::open(tmp.path()).expect("open");
    let page = source.find_after("chains", None, 2).expect("page");
    assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), vec![oid(A), oid(B)]);
    assert_eq!(page[0].field("chainId"), Some(&json!(1)));
    assert!(page[0].field("_id").is_none());

    let rest = source.find_after("chains", Some(&oid(B)), 2).expect("page");
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].id, oid(C));
    assert_eq!(rest[0].field("chainId"), Some(&json!(3)));

    assert!(source.find_after("chains", Some(&oid(C)), 2).expect("page").is_empty());
}

#[test]
fn json_array_export_loads() {
    let tmp = TempDir::new().expect("tmp");
    let docs = json!([
        { "_id": { "$oid": B }, "latitude": { "$numberDouble": "31.5" } },
        { "_id": { "$oid": A }, "latitude": 12 },
    ]);
    fs::write(tmp.path().join("nodes.json"), docs.to_string()).expect("write");

    let mut source = ExportDirSource::open(tmp.path()).expect("open");
    let page = source.find_after("nodes", None, 10).expect("page");
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].id, oid(A));
    assert_eq!(page[1].field("latitude"), Some(&json!(31.5)));
}

#[test]
fn missing_collection_file_is_empty() {
    let tmp = TempDir::new().expect("tmp");
    let mut source = ExportDirSource::open(tmp.path()).expect("open");
    assert!(source.find_after("monitors", None, 10).expect("page").is_empty());
}

#[test]
fn missing_directory_is_unavailable() {
    let tmp = TempDir::new().expect("tmp");
    let err = ExportDirSource::open(tmp.path().join("nope")).expect_err("missing dir");
    assert!(matches!(err, SourceError::Unavailable(_)));
}

#[test]
fn bad_lines_report_file_and_line() {
    let tmp = TempDir::new().expect("tmp");
    let body = format!("{}\n{{broken\n", json!({ "_id": { "$oid": A } }));
    fs::write(tmp.path().join("nodes.json"), body).expect("write");

    let mut source = ExportDirSource::open(tmp.path()).expect("open");
    let err = source.find_after("nodes", None, 10).expect_err("parse error");
    assert!(matches!(err, SourceError::Parse { line: 2, .. }));
}

#[test]
fn documents_without_id_or_with_duplicates_are_rejected() {
    let tmp = TempDir::new().expect("tmp");
    fs::write(tmp.path().join("a.json"), json!({ "name": "x" }).to_string()).expect("write");
    let dup = format!("{}\n{}\n", json!({ "_id": A }), json!({ "_id": { "$oid": A } }));
    fs::write(tmp.path().join("b.json"), dup).expect("write");

    let mut source = ExportDirSource::open(tmp.path()).expect("open");
    assert!(matches!(
        source.find_after("a", None, 1).expect_err("no id"),
        SourceError::MissingId { line: 1, .. }
    ));
    assert!(matches!(
        source.find_after("b", None, 1).expect_err("dup"),
        SourceError::DuplicateId { .. }
    ));
}

#[test]
fn builtin_entity_migrates_from_export() {
    let tmp = TempDir::new().expect("tmp");
    let lines = [
        json!({
            "_id": { "$oid": A },
            "tblock": { "$oid": B },
            "_arguments": [{ "$oid": C }, 5],
            "isBanned": true,
            "publishedAt": { "$date": "1970-01-01T00:00:02Z" },
            "ignored": "dropped",
        }),
        json!({ "_id": { "$oid": B } }),
    ];
    let text: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    fs::write(tmp.path().join("contracts.json"), text.join("\n")).expect("write");

    let catalog = Catalog::builtin().expect("catalog");
    let entity = catalog.require("contracts").expect("entity").clone();

    let source = ExportDirSource::open(tmp.path()).expect("open");
    let mut migrator = BatchMigrator::new(source, MemorySink::new());
    migrator.sync_schema(std::slice::from_ref(&entity)).expect("schema");
    let report = migrator
        .migrate(&entity, entity.batch_size, StartPoint::Beginning)
        .expect("migrate");
    assert_eq!(report.migrated, 2);

    let sink = migrator.sink();
    let first = sink.row("contracts", A).expect("row");
    assert_eq!(first.get("tblock"), &ColumnValue::Text(B.to_string()));
    assert_eq!(first.get("_arguments"), &ColumnValue::Text(format!("[\"{C}\",5]")));
    assert_eq!(first.get("isBanned"), &ColumnValue::Integer(1));
    assert_eq!(first.get("publishedAt"), &ColumnValue::Integer(2000));
    assert!(!first.values.contains_key("ignored"));

    let second = sink.row("contracts", B).expect("row");
    assert_eq!(second.get("tblock"), &ColumnValue::Null);
    assert_eq!(second.get("status"), &ColumnValue::Integer(1));
    assert_eq!(second.get("language"), &ColumnValue::Text("solidity".to_string()));
    assert_eq!(second.get("_arguments"), &ColumnValue::Text("[]".to_string()));
}

#[test]
fn only_the_collection_being_paged_stays_resident() {
    let tmp = TempDir::new().expect("tmp");
    for collection in ["chains", "nodes", "monitors"] {
        let text: Vec<String> = [A, B, C]
            .iter()
            .map(|id| json!({ "_id": { "$oid": id } }).to_string())
            .collect();
        fs::write(tmp.path().join(format!("{collection}.json")), text.join("\n")).expect("write");
    }

    let mut source = ExportDirSource::open(tmp.path()).expect("open");
    assert_eq!(source.find_after("chains", None, 2).expect("page").len(), 2);
    assert!(source.is_loaded("chains"));

    // Switching collections mid-way drops the previous dump.
    assert_eq!(source.find_after("nodes", None, 2).expect("page").len(), 2);
    assert!(!source.is_loaded("chains"));
    assert_eq!(source.loaded_count(), 1);

    // Paging past the end releases the collection.
    assert_eq!(source.find_after("nodes", Some(&oid(B)), 2).expect("page").len(), 1);
    assert!(source.find_after("nodes", Some(&oid(C)), 2).expect("page").is_empty());
    assert_eq!(source.loaded_count(), 0);

    let mut seen = Vec::new();
    let mut cursor = None;
    loop {
        let page = source.find_after("monitors", cursor.as_ref(), 1).expect("page");
        let Some(last) = page.last() else { break };
        cursor = Some(last.id);
        seen.push(last.id);
        assert_eq!(source.loaded_count(), 1);
    }
    assert_eq!(seen, vec![oid(A), oid(B), oid(C)]);
    assert_eq!(source.loaded_count(), 0);

    // A released collection reloads on demand.
    let again = source.find_after("chains", Some(&oid(B)), 2).expect("page");
    assert_eq!(again.iter().map(|r| r.id).collect::<Vec<_>>(), vec![oid(C)]);
}
