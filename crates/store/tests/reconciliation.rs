use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use roundtable_store::{DocumentStore, Filter, FixtureReconciler, PostSeedHook, SqliteStore, task_filter};
use roundtable_types::{CollectionSpec, RunnerConfig};
use serde_json::json;

fn config_with_fixtures(dir: &std::path::Path) -> RunnerConfig {
    fs::write(
        dir.join("todos.json"),
        json!([{"title": "a"}, {"title": "b"}]).to_string(),
    )
    .expect("write todos");
    fs::write(dir.join("issues.json"), json!({"title": "solo"}).to_string()).expect("write issues");

    let mut config = RunnerConfig::new("task-42");
    config.base_dir = Some(dir.to_path_buf());
    config.collections.insert(
        "todos".into(),
        CollectionSpec {
            required_count: 2,
            data_file: Some(PathBuf::from("todos.json")),
            required: None,
        },
    );
    config.collections.insert(
        "issues".into(),
        CollectionSpec {
            required_count: 1,
            data_file: Some(PathBuf::from("issues.json")),
            required: None,
        },
    );
    config
}

#[test]
fn empty_store_is_inconsistent_until_reseeded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_with_fixtures(dir.path());
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::open(&dir.path().join("db"), "builder").expect("open"));
    let reconciler = FixtureReconciler::new(store.clone(), &config);

    assert!(!reconciler.check_consistency().expect("check"));
    assert!(reconciler.ensure_clean_state(false).expect("ensure"));

    assert!(reconciler.check_consistency().expect("check"));
    assert_eq!(store.count_documents("todos", &task_filter("task-42")).expect("count"), 2);
    assert_eq!(store.count_documents("issues", &task_filter("task-42")).expect("count"), 1);
}

#[test]
fn ensure_clean_state_is_idempotent_when_consistent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_with_fixtures(dir.path());
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::in_memory().expect("open"));
    let reconciler = FixtureReconciler::new(store.clone(), &config);

    reconciler.reset_and_reseed().expect("seed");
    store.insert_many("todos", vec![json!({"title": "extra", "taskId": "task-42"})]).expect("insert extra");

    assert!(!reconciler.ensure_clean_state(false).expect("ensure"));
    assert_eq!(store.count_documents("todos", &Filter::new()).expect("count"), 3);

    assert!(reconciler.ensure_clean_state(true).expect("forced"));
    assert_eq!(store.count_documents("todos", &Filter::new()).expect("count"), 2);
}

#[test]
fn documents_for_other_tasks_do_not_satisfy_minimum() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_with_fixtures(dir.path());
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::in_memory().expect("open"));
    store
        .insert_many("todos", vec![json!({"taskId": "other"}), json!({"taskId": "other"})])
        .expect("insert");
    store.insert_many("issues", vec![json!({"taskId": "task-42"})]).expect("insert");

    let reconciler = FixtureReconciler::new(store, &config);
    assert!(!reconciler.check_consistency().expect("check"));
}

#[test]
fn post_seed_hook_sees_seeded_documents() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_with_fixtures(dir.path());
    let calls = Arc::new(AtomicUsize::new(0));
    let observed = calls.clone();
    let hook: PostSeedHook = Arc::new(move |store: &dyn DocumentStore| {
        observed.fetch_add(1, Ordering::SeqCst);
        assert_eq!(store.count_documents("todos", &Filter::new())?, 2);
        store.insert_many("audits", vec![json!({"taskId": "task-42", "round": 0})])?;
        Ok(())
    });

    let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::in_memory().expect("open"));
    FixtureReconciler::new(store.clone(), &config)
        .with_post_seed(hook)
        .reset_and_reseed()
        .expect("seed");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.count_documents("audits", &Filter::new()).expect("count"), 1);
}
