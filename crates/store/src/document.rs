use roundtable_types::TASK_ID_FIELD;
use roundtable_util::lookup_path;
use serde_json::{Map, Value};

use crate::StoreError;

/// Equality constraints keyed by (possibly dotted) field path; empty matches everything.
pub type Filter = Map<String, Value>;

/// The subset of a document database the orchestrator relies on.
///
/// Documents are JSON objects grouped into named collections. A collection
/// exists once something has been inserted into it and keeps existing after
/// its documents are deleted.
pub trait DocumentStore: Send + Sync {
    fn list_collection_names(&self) -> Result<Vec<String>, StoreError>;

    fn count_documents(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    /// Removes matching documents and returns how many were removed.
    fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    /// Inserts `documents`, creating the collection if needed. Every document must be an object.
    fn insert_many(&self, collection: &str, documents: Vec<Value>) -> Result<usize, StoreError>;
}

/// Whether `document` satisfies every constraint in `filter`.
pub fn filter_matches(filter: &Filter, document: &Value) -> bool {
    let Value::Object(fields) = document else {
        return filter.is_empty();
    };
    filter
        .iter()
        .all(|(path, expected)| lookup_path(fields, path).is_some_and(|actual| actual == expected))
}

/// Filter selecting the documents stamped with `task_id`.
pub fn task_filter(task_id: &str) -> Filter {
    let mut filter = Filter::new();
    filter.insert(TASK_ID_FIELD.to_string(), Value::String(task_id.to_string()));
    filter
}

pub(crate) fn ensure_objects(collection: &str, documents: &[Value]) -> Result<(), StoreError> {
    match documents.iter().position(|document| !document.is_object()) {
        Some(index) => Err(StoreError::invalid_document(
            collection,
            format!("item {index} is not a JSON object"),
        )),
        None => Ok(()),
    }
}
