//! Shared identifier types.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Destination row identifier: the 24-char lowercase hex form of an [`ObjectId`].
pub type RowId = String;

/// Name of the conflict-key column every destination table carries.
pub const ROW_ID_COLUMN: &str = "_id";

/// Errors raised while parsing an [`ObjectId`] from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// Input was not 24 characters long.
    #[error("object id must be 24 hex characters, got {0}")]
    Length(usize),
    /// Input contained a non-hex character.
    #[error("object id contains non-hex characters: {0:?}")]
    InvalidHex(String),
}

/// 12-byte origin-store identifier.
///
/// Ordering is byte-lexicographic, which matches the origin store's natural
/// `_id` ordering and the ordering of the lowercase hex encoding.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "ObjectIdRepr", into = "String")]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Number of raw bytes.
    pub const LEN: usize = 12;

    /// Wraps raw bytes.
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    pub const fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Parses the 24-char hex form, accepting either case.
    pub fn parse_str(s: &str) -> Result<Self, IdError> {
        if s.len() != Self::LEN * 2 {
            return Err(IdError::Length(s.len()));
        }
        let mut out = [0u8; 12];
        hex::decode_to_slice(s, &mut out).map_err(|_| IdError::InvalidHex(s.to_string()))?;
        Ok(Self(out))
    }

    /// Canonical 24-char lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

impl From<ObjectId> for String {
    fn from(value: ObjectId) -> Self {
        value.to_hex()
    }
}

/// Accepted serialized shapes: bare hex or extended JSON `{"$oid": "..."}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ObjectIdRepr {
    Hex(String),
    Extended {
        #[serde(rename = "$oid")]
        oid: String,
    },
}

impl TryFrom<ObjectIdRepr> for ObjectId {
    type Error = IdError;

    fn try_from(value: ObjectIdRepr) -> Result<Self, Self::Error> {
        match value {
            ObjectIdRepr::Hex(s) | ObjectIdRepr::Extended { oid: s } => Self::parse_str(&s),
        }
    }
}
