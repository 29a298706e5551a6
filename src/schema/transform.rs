//! Source-record to target-row recoding and the reverse read path.

use chrono::DateTime;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::{
    record::{ColumnValue, SourceRecord, TargetRow},
    types::{ObjectId, ROW_ID_COLUMN, RowId},
};

use super::{
    codec::{Codec, CodecError},
    descriptor::{EntityDescriptor, FieldDescriptor, FieldKind},
};

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("field `{field}`: {source}")]
    Codec {
        field: String,
        #[source]
        source: CodecError,
    },
}

/// Re-encodes an optional origin id as a destination row id.
pub fn reencode_id(id: Option<&ObjectId>) -> Option<RowId> {
    id.map(ObjectId::to_hex)
}

/// Reads an object id out of `{"$oid": "<hex>"}` or a bare hex string.
pub fn reference_id(value: &Value) -> Option<ObjectId> {
    match value {
        Value::String(s) => ObjectId::parse_str(s).ok(),
        Value::Object(map) if map.len() == 1 => map
            .get("$oid")
            .and_then(Value::as_str)
            .and_then(|s| ObjectId::parse_str(s).ok()),
        _ => None,
    }
}

/// Replaces every nested `{"$oid": ..}` wrapper with its hex string.
pub fn flatten_object_ids(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            if map.len() == 1 && map.contains_key("$oid") {
                if let Some(id) = reference_id(value) {
                    return Value::String(id.to_hex());
                }
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), flatten_object_ids(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(flatten_object_ids).collect()),
        other => other.clone(),
    }
}

/// Epoch milliseconds from an extended-JSON date, RFC 3339 text, or an integer.
pub fn timestamp_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(_) => integer_of(value),
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|d| d.timestamp_millis())
            .ok()
            .or_else(|| s.trim().parse::<i64>().ok()),
        Value::Object(map) => {
            if let Some(inner) = map.get("$date") {
                timestamp_millis(inner)
            } else {
                map.get("$numberLong")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<i64>().ok())
            }
        }
        _ => None,
    }
}

fn integer_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < 9.2e18).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0 && f.abs() < 9.2e18)
                    .map(|f| f as i64)
            })
        }
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Object(map) => map
            .get("$numberLong")
            .or_else(|| map.get("$numberInt"))
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<i64>().ok()),
        _ => None,
    }
}

fn float_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        Value::Object(map) => map
            .get("$numberDouble")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|f| f.is_finite()),
        _ => None,
    }
}

fn bool_of(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(_) => match reference_id(value) {
            Some(id) => Some(id.to_hex()),
            None => serde_json::to_string(&flatten_object_ids(value)).ok(),
        },
        Value::Array(_) => serde_json::to_string(&flatten_object_ids(value)).ok(),
        Value::Null => None,
    }
}

/// Recodes one non-null value; `Ok(None)` flags a shape mismatch.
fn recode(field: &FieldDescriptor, value: &Value) -> Result<Option<ColumnValue>, TransformError> {
    let out = match field.kind {
        FieldKind::Text => text_of(value).map(ColumnValue::Text),
        FieldKind::Integer => integer_of(value).map(ColumnValue::Integer),
        FieldKind::Float => float_of(value).map(ColumnValue::Real),
        FieldKind::Bool => bool_of(value).map(|b| ColumnValue::Integer(i64::from(b))),
        FieldKind::Reference => reencode_id(reference_id(value).as_ref()).map(ColumnValue::Text),
        FieldKind::Timestamp => timestamp_millis(value).map(ColumnValue::Integer),
        FieldKind::Json => {
            let text = Codec::Json
                .encode(&flatten_object_ids(value))
                .map_err(|source| TransformError::Codec {
                    field: field.name.clone(),
                    source,
                })?;
            Some(ColumnValue::Text(text))
        }
    };
    Ok(out)
}

fn column_value(field: &FieldDescriptor, input: Option<&Value>) -> Result<ColumnValue, TransformError> {
    if let Some(value) = input {
        if let Some(out) = recode(field, value)? {
            return Ok(out);
        }
        debug!(field = %field.name, kind = ?field.kind, "value does not fit field kind, using default");
    }

    match field.default.as_ref().filter(|d| !d.is_null()) {
        Some(default) => Ok(recode(field, default)?.unwrap_or(ColumnValue::Null)),
        None => Ok(ColumnValue::Null),
    }
}

/// Maps one source record into its destination row.
pub fn transform_record(
    entity: &EntityDescriptor,
    record: &SourceRecord,
) -> Result<TargetRow, TransformError> {
    let mut row = TargetRow::new(record.id.to_hex());
    for field in &entity.fields {
        let value = column_value(field, record.field(&field.name))?;
        row.values.insert(field.column_name().to_string(), value);
    }
    Ok(row)
}

pub fn transform_batch(
    entity: &EntityDescriptor,
    records: &[SourceRecord],
) -> Result<Vec<TargetRow>, TransformError> {
    records.iter().map(|r| transform_record(entity, r)).collect()
}

/// Turns a stored row back into JSON values keyed by destination column.
///
/// Bool columns come back as booleans and codec columns are decoded; a NULL
/// codec column yields the field default.
pub fn decode_row(entity: &EntityDescriptor, row: &TargetRow) -> Result<Map<String, Value>, TransformError> {
    let mut out = Map::new();
    out.insert(ROW_ID_COLUMN.to_string(), Value::String(row.id.clone()));

    for field in &entity.fields {
        let column = field.column_name();
        let value = match (row.get(column), field.kind.codec()) {
            (ColumnValue::Null, Some(_)) => field.default.clone().unwrap_or(Value::Null),
            (ColumnValue::Null, None) => Value::Null,
            (ColumnValue::Text(text), Some(codec)) => {
                codec.decode(text).map_err(|source| TransformError::Codec {
                    field: field.name.clone(),
                    source,
                })?
            }
            (ColumnValue::Integer(v), _) if field.kind == FieldKind::Bool => Value::Bool(*v != 0),
            (ColumnValue::Integer(v), _) => Value::from(*v),
            (ColumnValue::Real(v), _) => Value::from(*v),
            (ColumnValue::Text(text), None) => Value::String(text.clone()),
        };
        out.insert(column.to_string(), value);
    }
    Ok(out)
}
