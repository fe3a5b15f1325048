use std::sync::Mutex;

use indexmap::IndexMap;
use serde_json::Value;

use crate::document::ensure_objects;
use crate::{DocumentStore, Filter, StoreError, filter_matches};

/// In-process store, used for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<IndexMap<String, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a collection's documents, in insertion order.
    pub fn documents(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let collections = self.collections.lock().map_err(|_| StoreError::Lock)?;
        Ok(collections.get(collection).cloned().unwrap_or_default())
    }
}

impl DocumentStore for MemoryStore {
    fn list_collection_names(&self) -> Result<Vec<String>, StoreError> {
        let collections = self.collections.lock().map_err(|_| StoreError::Lock)?;
        Ok(collections.keys().cloned().collect())
    }

    fn count_documents(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let collections = self.collections.lock().map_err(|_| StoreError::Lock)?;
        let count = collections
            .get(collection)
            .map(|documents| documents.iter().filter(|document| filter_matches(filter, document)).count())
            .unwrap_or(0);
        Ok(count as u64)
    }

    fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let mut collections = self.collections.lock().map_err(|_| StoreError::Lock)?;
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = documents.len();
        documents.retain(|document| !filter_matches(filter, document));
        Ok((before - documents.len()) as u64)
    }

    fn insert_many(&self, collection: &str, documents: Vec<Value>) -> Result<usize, StoreError> {
        ensure_objects(collection, &documents)?;
        let mut collections = self.collections.lock().map_err(|_| StoreError::Lock)?;
        let inserted = documents.len();
        collections.entry(collection.to_string()).or_default().extend(documents);
        Ok(inserted)
    }
}
