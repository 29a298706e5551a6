//! In-memory origin store.

use std::{collections::BTreeMap, ops::Bound};

use hashbrown::HashMap;

use crate::{record::SourceRecord, types::ObjectId};

use super::{SourceResult, SourceStore};

/// Collections held in id order.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    collections: HashMap<String, BTreeMap<ObjectId, SourceRecord>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a record.
    pub fn upsert(&mut self, collection: &str, record: SourceRecord) {
        self.collections
            .entry_ref(collection)
            .or_default()
            .insert(record.id, record);
    }

    /// Loads records into `collection`, keeping the last copy of a repeated id.
    pub fn extend(&mut self, collection: &str, records: impl IntoIterator<Item = SourceRecord>) {
        let docs = self.collections.entry_ref(collection).or_default();
        for record in records {
            docs.insert(record.id, record);
        }
    }

    /// Documents held for `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, BTreeMap::len)
    }
}

impl SourceStore for MemorySource {
    fn find_after(
        &mut self,
        collection: &str,
        cursor: Option<&ObjectId>,
        limit: usize,
    ) -> SourceResult<Vec<SourceRecord>> {
        let Some(docs) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let lower = match cursor {
            Some(id) => Bound::Excluded(*id),
            None => Bound::Unbounded,
        };
        Ok(docs
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, rec)| rec.clone())
            .collect())
    }
}
