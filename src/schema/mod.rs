//! Entity descriptors, field codecs, and record transformation.

use std::path::PathBuf;

use thiserror::Error;

/// Catalog of entity descriptors.
pub mod catalog;
/// Reversible text codecs for nested values.
pub mod codec;
/// Entity and field descriptor types.
pub mod descriptor;
/// Record to row recoding.
pub mod transform;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("reading catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("catalog parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("entity `{0}` is declared twice")]
    DuplicateEntity(String),
    #[error("entity `{entity}` maps two fields onto column `{column}`")]
    DuplicateColumn { entity: String, column: String },
    #[error("entity `{entity}` cannot map a field onto reserved column `{column}`")]
    ReservedColumn { entity: String, column: String },
    #[error("entity `{entity}`: {message}")]
    Invalid { entity: String, message: String },
    #[error("unknown entity `{0}`")]
    UnknownEntity(String),
}
