//! Text codecs for nested field values.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Failure while encoding or decoding a stored text value.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Reversible `value <-> text` mapping attached to a field kind.
///
/// `decode(encode(x)) == x` holds for every value the codec accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    /// Compact JSON text.
    Json,
}

impl Codec {
    pub fn encode(self, value: &Value) -> Result<String, CodecError> {
        match self {
            Codec::Json => serde_json::to_string(value).map_err(CodecError::Encode),
        }
    }

    pub fn decode(self, text: &str) -> Result<Value, CodecError> {
        match self {
            Codec::Json => serde_json::from_str(text).map_err(CodecError::Decode),
        }
    }
}
