//! Pre-run reconciliation of the backing store against declared fixtures.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use roundtable_types::{CollectionSpec, RunnerConfig, TASK_ID_FIELD};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{DocumentStore, Filter, StoreError, task_filter};

/// Callback run after fixtures are seeded, for bespoke adjustments.
pub type PostSeedHook = Arc<dyn Fn(&dyn DocumentStore) -> Result<(), StoreError> + Send + Sync>;

/// Verifies and repairs the backing store against the configured collections.
pub struct FixtureReconciler {
    store: Arc<dyn DocumentStore>,
    task_id: String,
    collections: IndexMap<String, CollectionSpec>,
    post_seed: Option<PostSeedHook>,
}

impl fmt::Debug for FixtureReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureReconciler")
            .field("task_id", &self.task_id)
            .field("collections", &self.collections)
            .field("post_seed", &self.post_seed.is_some())
            .finish()
    }
}

impl FixtureReconciler {
    /// Builds a reconciler for `config`'s collections; fixture paths resolve against its base directory.
    pub fn new(store: Arc<dyn DocumentStore>, config: &RunnerConfig) -> Self {
        let collections = config
            .collections
            .iter()
            .map(|(name, spec)| {
                let mut spec = spec.clone();
                spec.data_file = spec.data_file.as_deref().map(|path| config.resolve_path(path));
                (name.clone(), spec)
            })
            .collect();
        Self {
            store,
            task_id: config.task_id.clone(),
            collections,
            post_seed: None,
        }
    }

    pub fn with_post_seed(mut self, hook: PostSeedHook) -> Self {
        self.post_seed = Some(hook);
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Whether every collection with a nonzero minimum exists and holds enough task documents.
    ///
    /// All collections are inspected so every shortfall gets logged.
    pub fn check_consistency(&self) -> Result<bool, StoreError> {
        let existing = self.store.list_collection_names()?;
        let filter = task_filter(&self.task_id);
        let mut consistent = true;

        for (name, spec) in &self.collections {
            if spec.required_count == 0 {
                continue;
            }
            if !existing.iter().any(|candidate| candidate == name) {
                warn!(collection = %name, "required collection is missing");
                consistent = false;
                continue;
            }
            let count = self.store.count_documents(name, &filter)?;
            if count < spec.required_count {
                warn!(
                    collection = %name,
                    count,
                    required = spec.required_count,
                    "collection holds fewer documents than required"
                );
                consistent = false;
            }
        }

        debug!(consistent, "backing store consistency check finished");
        Ok(consistent)
    }

    /// Clears every declared collection and reloads the fixtures.
    pub fn reset_and_reseed(&self) -> Result<(), StoreError> {
        info!(task_id = %self.task_id, "resetting backing store");
        let everything = Filter::new();
        for name in self.collections.keys() {
            let deleted = self.store.delete_many(name, &everything)?;
            debug!(collection = %name, deleted, "cleared collection");
        }

        for (name, spec) in &self.collections {
            let Some(path) = spec.data_file.as_deref() else {
                continue;
            };
            if !path.exists() {
                if spec.is_required() {
                    return Err(StoreError::MissingFixture {
                        collection: name.clone(),
                        path: path.to_path_buf(),
                    });
                }
                debug!(collection = %name, path = %path.display(), "optional fixture missing; skipping");
                continue;
            }

            let documents = load_fixture(path, &self.task_id)?;
            if documents.is_empty() {
                continue;
            }
            let inserted = self.store.insert_many(name, documents)?;
            info!(collection = %name, inserted, "seeded fixture documents");
        }

        if let Some(hook) = &self.post_seed {
            hook(self.store.as_ref())?;
            debug!("post-seed hook completed");
        }
        Ok(())
    }

    /// Reseeds when forced or inconsistent; returns whether a reseed happened.
    pub fn ensure_clean_state(&self, force: bool) -> Result<bool, StoreError> {
        if force || !self.check_consistency()? {
            self.reset_and_reseed()?;
            return Ok(true);
        }
        debug!("backing store already consistent; nothing to do");
        Ok(false)
    }
}

/// Reads a fixture file, coercing a single object to a list and stamping the task id.
fn load_fixture(path: &Path, task_id: &str) -> Result<Vec<Value>, StoreError> {
    let text = fs::read_to_string(path)?;
    let parsed: Value = serde_json::from_str(&text).map_err(|error| invalid_fixture(path, error.to_string()))?;

    let items = match parsed {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        _ => return Err(invalid_fixture(path, "expected a JSON object or an array of objects")),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(mut fields) => {
                fields.insert(TASK_ID_FIELD.to_string(), Value::String(task_id.to_string()));
                Ok(Value::Object(fields))
            }
            _ => Err(invalid_fixture(path, format!("item {index} is not a JSON object"))),
        })
        .collect()
}

fn invalid_fixture(path: &Path, reason: impl Into<String>) -> StoreError {
    StoreError::InvalidFixture {
        path: PathBuf::from(path),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use serde_json::json;

    fn config(dir: &Path) -> RunnerConfig {
        let mut config = RunnerConfig::new("task-1");
        config.base_dir = Some(dir.to_path_buf());
        config
    }

    #[test]
    fn single_object_fixture_becomes_one_stamped_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("todos.json"), r#"{"title": "only"}"#).expect("write fixture");

        let docs = load_fixture(&dir.path().join("todos.json"), "task-1").expect("load");
        assert_eq!(docs, vec![json!({"title": "only", "taskId": "task-1"})]);
    }

    #[test]
    fn scalar_fixture_is_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        fs::write(&path, "42").expect("write fixture");
        assert!(matches!(load_fixture(&path, "t"), Err(StoreError::InvalidFixture { .. })));
    }

    #[test]
    fn collections_without_minimum_are_ignored_by_check() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config(dir.path());
        config.collections.insert("issues".into(), CollectionSpec::default());

        let reconciler = FixtureReconciler::new(Arc::new(MemoryStore::new()), &config);
        assert!(reconciler.check_consistency().expect("check"));
    }

    #[test]
    fn optional_missing_fixture_is_skipped_and_required_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config(dir.path());
        config.collections.insert(
            "issues".into(),
            CollectionSpec {
                required_count: 0,
                data_file: Some(PathBuf::from("issues.json")),
                required: None,
            },
        );
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        FixtureReconciler::new(store.clone(), &config)
            .reset_and_reseed()
            .expect("optional fixture skipped");

        config.collections.insert(
            "todos".into(),
            CollectionSpec {
                required_count: 1,
                data_file: Some(PathBuf::from("todos.json")),
                required: None,
            },
        );
        let err = FixtureReconciler::new(store, &config)
            .reset_and_reseed()
            .expect_err("required fixture missing");
        assert!(matches!(err, StoreError::MissingFixture { ref collection, .. } if collection == "todos"));
    }
}
