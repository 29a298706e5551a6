use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    record::ColumnType,
    types::ROW_ID_COLUMN,
};

use super::codec::Codec;

/// Page size used when a descriptor does not set one.
pub const DEFAULT_BATCH_SIZE: usize = 2000;

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// How a source field is recoded into its destination column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Bool,
    /// Nested value stored as text through [`Codec::Json`].
    Json,
    /// Foreign object id, re-encoded like the row id.
    Reference,
    /// Date stored as epoch milliseconds.
    Timestamp,
}

impl FieldKind {
    /// Destination storage class.
    pub fn column_type(self) -> ColumnType {
        match self {
            FieldKind::Text | FieldKind::Json | FieldKind::Reference => ColumnType::Text,
            FieldKind::Integer | FieldKind::Bool | FieldKind::Timestamp => ColumnType::Integer,
            FieldKind::Float => ColumnType::Real,
        }
    }

    /// Codec applied on write and reversed on read, if any.
    pub fn codec(self) -> Option<Codec> {
        match self {
            FieldKind::Json => Some(Codec::Json),
            _ => None,
        }
    }
}

/// Mapping rule for one source field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name in the source document.
    pub name: String,
    /// Destination column when it differs from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub kind: FieldKind,
    /// Substituted when the source field is absent or null.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Written on insert only; never overwritten by a later upsert.
    #[serde(default)]
    pub insert_only: bool,
}

impl FieldDescriptor {
    /// Shorthand for a same-named field without default.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            column: None,
            kind,
            default: None,
            insert_only: false,
        }
    }

    /// Builder: store under a different column name.
    pub fn renamed(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Builder: substitute `value` for absent/null input.
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Builder: exclude from update-on-conflict.
    pub fn insert_only(mut self) -> Self {
        self.insert_only = true;
        self
    }

    /// Destination column name.
    pub fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }
}

/// Source collection, destination table, and field mapping for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Entity type name, used as config key and log prefix.
    pub name: String,
    pub collection: String,
    pub table: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
}

impl EntityDescriptor {
    pub fn new(
        name: impl Into<String>,
        collection: impl Into<String>,
        table: impl Into<String>,
        fields: Vec<FieldDescriptor>,
    ) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            table: table.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            fields,
        }
    }

    /// All destination columns in insert order, conflict key first.
    pub fn columns(&self) -> Vec<String> {
        std::iter::once(ROW_ID_COLUMN.to_string())
            .chain(self.fields.iter().map(|f| f.column_name().to_string()))
            .collect()
    }

    /// Columns overwritten when the row already exists.
    pub fn update_columns(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| !f.insert_only)
            .map(|f| f.column_name().to_string())
            .collect()
    }

    /// Destination table layout.
    pub fn table_schema(&self) -> TableSchema {
        let mut columns = Vec::with_capacity(self.fields.len() + 1);
        columns.push(ColumnDef {
            name: ROW_ID_COLUMN.to_string(),
            ty: ColumnType::Text,
        });
        columns.extend(self.fields.iter().map(|f| ColumnDef {
            name: f.column_name().to_string(),
            ty: f.kind.column_type(),
        }));
        TableSchema {
            table: self.table.clone(),
            columns,
        }
    }
}

/// One destination column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
}

/// Destination table layout; the first column is always the conflict key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnDef>,
}
