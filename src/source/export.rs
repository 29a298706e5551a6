//! Origin store backed by a directory of `mongoexport` dumps.
//!
//! Each collection lives in `<dir>/<collection>.json`, either one Extended
//! JSON document per line or a single JSON array (`--jsonArray`). Numeric
//! wrappers (`$numberLong`, `$numberInt`, `$numberDouble`) are unwrapped on
//! load; `$oid` and `$date` wrappers are kept for the field kinds to recode.

use std::{
    collections::BTreeMap,
    fs,
    ops::Bound,
    path::{Path, PathBuf},
};

use hashbrown::HashMap;
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

use crate::{
    record::SourceRecord,
    schema::transform::reference_id,
    types::{ObjectId, ROW_ID_COLUMN},
};

use super::{SourceError, SourceResult, SourceStore};

/// Lazily loads a collection on first access and serves pages from memory.
///
/// At most one collection is resident: loading another evicts it, and a
/// collection is released once a page past its last document is served.
#[derive(Debug)]
pub struct ExportDirSource {
    dir: PathBuf,
    loaded: HashMap<String, BTreeMap<ObjectId, SourceRecord>>,
}

impl ExportDirSource {
    /// Opens `dir`; fails when it is not an existing directory.
    pub fn open(dir: impl AsRef<Path>) -> SourceResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(SourceError::Unavailable(format!(
                "export directory {} does not exist",
                dir.display()
            )));
        }
        Ok(Self {
            dir,
            loaded: HashMap::new(),
        })
    }

    /// Path the dump for `collection` is read from.
    pub fn collection_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.json"))
    }

    /// Whether `collection` is currently held in memory.
    pub fn is_loaded(&self, collection: &str) -> bool {
        self.loaded.contains_key(collection)
    }

    /// Number of collections currently held in memory.
    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    fn ensure_loaded(&mut self, collection: &str) -> SourceResult<&BTreeMap<ObjectId, SourceRecord>> {
        if !self.loaded.contains_key(collection) {
            self.evict_all();
            let path = self.collection_path(collection);
            let docs = if path.exists() {
                load_collection(&path)?
            } else {
                warn!(collection, path = %path.display(), "no export file, treating collection as empty");
                BTreeMap::new()
            };
            debug!(collection, documents = docs.len(), "loaded export");
            self.loaded.insert(collection.to_string(), docs);
        }
        Ok(&self.loaded[collection])
    }

    fn evict_all(&mut self) {
        for (name, docs) in self.loaded.drain() {
            debug!(collection = %name, documents = docs.len(), "released export");
        }
    }
}

impl SourceStore for ExportDirSource {
    fn find_after(
        &mut self,
        collection: &str,
        cursor: Option<&ObjectId>,
        limit: usize,
    ) -> SourceResult<Vec<SourceRecord>> {
        let docs = self.ensure_loaded(collection)?;
        let lower = match cursor {
            Some(id) => Bound::Excluded(*id),
            None => Bound::Unbounded,
        };
        let page: Vec<SourceRecord> = docs
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, rec)| rec.clone())
            .collect();
        if page.is_empty() {
            self.evict_all();
        }
        Ok(page)
    }
}

/// Parses one export file into id-ordered records.
pub fn load_collection(path: &Path) -> SourceResult<BTreeMap<ObjectId, SourceRecord>> {
    let text = fs::read_to_string(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut docs = BTreeMap::new();
    if text.trim_start().starts_with('[') {
        let values: Vec<Value> = serde_json::from_str(&text).map_err(|source| SourceError::Parse {
            path: path.to_path_buf(),
            line: source.line(),
            source,
        })?;
        for (idx, value) in values.into_iter().enumerate() {
            push_document(&mut docs, path, idx + 1, value)?;
        }
    } else {
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(line).map_err(|source| SourceError::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                source,
            })?;
            push_document(&mut docs, path, idx + 1, value)?;
        }
    }
    Ok(docs)
}

fn push_document(
    docs: &mut BTreeMap<ObjectId, SourceRecord>,
    path: &Path,
    line: usize,
    value: Value,
) -> SourceResult<()> {
    let Value::Object(mut fields) = normalize_numbers(value) else {
        return Err(SourceError::MissingId {
            path: path.to_path_buf(),
            line,
        });
    };

    let id = fields
        .remove(ROW_ID_COLUMN)
        .as_ref()
        .and_then(reference_id)
        .ok_or_else(|| SourceError::MissingId {
            path: path.to_path_buf(),
            line,
        })?;

    if docs.contains_key(&id) {
        let collection = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Err(SourceError::DuplicateId { collection, id });
    }
    docs.insert(id, SourceRecord::new(id, fields));
    Ok(())
}

/// Unwraps Extended JSON numeric wrappers, recursively.
pub fn normalize_numbers(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(n) = unwrap_number(&map) {
                    return n;
                }
            }
            Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, normalize_numbers(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_numbers).collect()),
        other => other,
    }
}

fn unwrap_number(map: &Map<String, Value>) -> Option<Value> {
    let (key, inner) = map.iter().next()?;
    let text = inner.as_str()?;
    match key.as_str() {
        "$numberLong" | "$numberInt" => text.parse::<i64>().ok().map(Value::from),
        "$numberDouble" => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        _ => None,
    }
}
