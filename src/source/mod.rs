//! Origin-store abstraction and implementations.

pub mod export;
pub mod memory;

use std::path::PathBuf;

use thiserror::Error;

use crate::{record::SourceRecord, types::ObjectId};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("origin store unavailable: {0}")]
    Unavailable(String),
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}:{line}: document has no usable `_id`")]
    MissingId { path: PathBuf, line: usize },
    #[error("duplicate `_id` {id} in collection `{collection}`")]
    DuplicateId { collection: String, id: ObjectId },
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Ordered read access to the origin store.
pub trait SourceStore: Send {
    /// Returns up to `limit` records of `collection` with id strictly greater
    /// than `cursor` (or from the beginning when `None`), ascending by id.
    fn find_after(
        &mut self,
        collection: &str,
        cursor: Option<&ObjectId>,
        limit: usize,
    ) -> SourceResult<Vec<SourceRecord>>;
}

impl<S: SourceStore + ?Sized> SourceStore for Box<S> {
    fn find_after(
        &mut self,
        collection: &str,
        cursor: Option<&ObjectId>,
        limit: usize,
    ) -> SourceResult<Vec<SourceRecord>> {
        (**self).find_after(collection, cursor, limit)
    }
}
