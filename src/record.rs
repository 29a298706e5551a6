//! Source documents, destination rows, and column values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{ObjectId, RowId};

/// Immutable document read from the origin store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Origin identifier, stripped from `fields`.
    pub id: ObjectId,
    /// Remaining document fields.
    pub fields: Map<String, Value>,
}

impl SourceRecord {
    /// Builds a record from an id and a field map, dropping any stray `_id` key.
    pub fn new(id: ObjectId, mut fields: Map<String, Value>) -> Self {
        fields.remove(crate::types::ROW_ID_COLUMN);
        Self { id, fields }
    }

    /// Returns a field, treating explicit `null` the same as absence.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|v| !v.is_null())
    }
}

/// Storage class of a destination column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// UTF-8 text.
    Text,
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Real,
}

impl ColumnType {
    /// SQL type name used in generated DDL.
    pub fn sql_name(self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
        }
    }
}

/// Scalar value stored in one destination column.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum ColumnValue {
    /// SQL NULL.
    #[default]
    Null,
    /// Integer value.
    Integer(i64),
    /// Floating-point value.
    Real(f64),
    /// Text value.
    Text(String),
}

/// Row reconciled into the destination store, keyed by [`RowId`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TargetRow {
    /// Conflict key derived from the source id.
    pub id: RowId,
    /// Mapped column values. Columns missing here are written as NULL.
    pub values: BTreeMap<String, ColumnValue>,
}

impl TargetRow {
    /// Empty row for `id`.
    pub fn new(id: RowId) -> Self {
        Self {
            id,
            values: BTreeMap::new(),
        }
    }

    /// Value for `column`, NULL when unset.
    pub fn get(&self, column: &str) -> &ColumnValue {
        static NULL: ColumnValue = ColumnValue::Null;
        self.values.get(column).unwrap_or(&NULL)
    }
}
