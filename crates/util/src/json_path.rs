//! Dotted-path traversal over JSON objects.
//!
//! Paths such as `pr_urls.worker1` address nested object members. Lookups
//! treat a missing segment or a non-object intermediate as "not found";
//! inserts create intermediate objects on demand.

use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while interpreting or writing a dotted path.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path '{path}' is empty or contains an empty segment")]
    EmptySegment { path: String },

    #[error("cannot descend into '{segment}' of path '{path}': existing value is not an object")]
    NotAContainer { path: String, segment: String },
}

/// Splits a dotted path into its segments, rejecting empty segments.
pub fn split_path(path: &str) -> Result<Vec<&str>, PathError> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(PathError::EmptySegment { path: path.to_string() });
    }
    Ok(segments)
}

/// Resolves a dotted path inside `root`.
pub fn lookup_path<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let segments = split_path(path).ok()?;
    let (first, rest) = segments.split_first()?;
    let mut current = root.get(*first)?;
    for segment in rest {
        current = current.as_object()?.get(*segment)?;
    }
    Some(current)
}

/// Assigns `value` at a dotted path inside `root`, creating intermediate objects.
pub fn insert_path(root: &mut Map<String, Value>, path: &str, value: Value) -> Result<(), PathError> {
    let segments = split_path(path)?;
    let Some((leaf, parents)) = segments.split_last() else {
        return Err(PathError::EmptySegment { path: path.to_string() });
    };

    let mut current = root;
    for segment in parents {
        let entry = current
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = entry.as_object_mut().ok_or_else(|| PathError::NotAContainer {
            path: path.to_string(),
            segment: (*segment).to_string(),
        })?;
    }
    current.insert((*leaf).to_string(), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn looks_up_nested_values() {
        let root = object(json!({"pr_urls": {"worker1": "https://x/pr/1"}}));
        assert_eq!(lookup_path(&root, "pr_urls.worker1"), Some(&json!("https://x/pr/1")));
        assert_eq!(lookup_path(&root, "pr_urls"), Some(&json!({"worker1": "https://x/pr/1"})));
    }

    #[test]
    fn lookup_through_scalar_is_not_found() {
        let root = object(json!({"pr_urls": "flat"}));
        assert_eq!(lookup_path(&root, "pr_urls.worker1"), None);
        assert_eq!(lookup_path(&root, "missing"), None);
        assert_eq!(lookup_path(&root, "pr_urls..worker1"), None);
    }

    #[test]
    fn insert_creates_intermediate_objects() {
        let mut root = Map::new();
        insert_path(&mut root, "submission_data.worker1.roundNumber", json!(1)).expect("insert");
        assert_eq!(Value::Object(root), json!({"submission_data": {"worker1": {"roundNumber": 1}}}));
    }

    #[test]
    fn insert_refuses_to_descend_into_scalars() {
        let mut root = object(json!({"pr_urls": "flat"}));
        let err = insert_path(&mut root, "pr_urls.worker1", json!("x")).expect_err("scalar intermediate");
        assert!(matches!(err, PathError::NotAContainer { ref segment, .. } if segment == "pr_urls"));
    }

    #[test]
    fn rejects_empty_segments() {
        assert!(split_path("").is_err());
        assert!(split_path("a.").is_err());
        assert_eq!(split_path("a.b").expect("valid path"), vec!["a", "b"]);
    }
}
