//! Data models for the runner configuration file.
//!
//! The configuration is authored as YAML or JSON. Worker and collection maps
//! keep authoring order (via `IndexMap`) because workers are spawned, and
//! collections reseeded, in the order they are declared.

mod validation;

use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use validation::{ConfigValidationError, validate_config};

const DEFAULT_BASE_PORT: u16 = 5000;
const DEFAULT_GRACE_MS: u64 = 5000;
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_STATE_FILE: &str = "test_state.json";
const DEFAULT_DATABASE_NAME: &str = "roundtable";

/// Top-level runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunnerConfig {
    /// Identifier stamped onto fixtures and used to filter store counts.
    pub task_id: String,
    /// First port used when a worker does not declare one.
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// Explicit number of rounds; computed from the store when omitted.
    #[serde(default)]
    pub max_rounds: Option<u32>,
    /// Collection whose task documents determine the round count.
    #[serde(default)]
    pub rounds_collection: Option<String>,
    /// Directory relative paths resolve against (defaults to the config file's directory).
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    /// Directory holding the state file and worker databases.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// State file path; relative values resolve against `data_dir`.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    /// Launchable worker server entry point.
    #[serde(default)]
    pub server_entrypoint: Option<PathBuf>,
    /// Optional interpreter used to launch the entry point (for example `python3`).
    #[serde(default)]
    pub server_command: Option<String>,
    /// Arguments passed to every worker after the entry point.
    #[serde(default)]
    pub server_args: Vec<String>,
    /// How long a worker must stay alive after spawn to count as started.
    #[serde(default = "default_grace_ms")]
    pub startup_grace_ms: u64,
    /// How long a worker gets to exit after the graceful termination signal.
    #[serde(default = "default_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Backing store connection settings.
    #[serde(default)]
    pub database: DatabaseSettings,
    /// Fixture policy keyed by collection name.
    #[serde(default)]
    pub collections: IndexMap<String, CollectionSpec>,
    /// Worker declarations keyed by worker name.
    #[serde(default)]
    pub workers: IndexMap<String, WorkerSettings>,
    /// Remaining top-level keys, merged into the global state scope on a fresh run.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Configuration for a single worker process.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkerSettings {
    /// Port override; assigned sequentially from `base_port` when omitted.
    #[serde(default)]
    pub port: Option<u16>,
    /// Literal environment values for the worker.
    #[serde(default)]
    pub env: IndexMap<String, String>,
    /// Worker variable name mapped to the parent environment variable supplying its value.
    #[serde(default)]
    pub env_vars: IndexMap<String, String>,
    /// Extra arguments appended after the shared server arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Pass-through fields exposed read-only to steps.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Minimum-document policy and fixture source for one collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CollectionSpec {
    /// Documents (matching the task id) required for the store to be consistent.
    #[serde(default)]
    pub required_count: u64,
    /// Fixture file holding a JSON object or array of objects.
    #[serde(default)]
    pub data_file: Option<PathBuf>,
    /// Whether a missing fixture file is fatal; defaults to `required_count > 0`.
    #[serde(default)]
    pub required: Option<bool>,
}

impl CollectionSpec {
    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(self.required_count > 0)
    }
}

/// Which document store backend to open.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

/// Backing store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseSettings {
    /// Logical database name.
    #[serde(default = "default_database_name")]
    pub name: String,
    /// Directory holding database files; defaults to the data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub backend: StoreBackend,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            name: default_database_name(),
            path: None,
            backend: StoreBackend::default(),
        }
    }
}

impl RunnerConfig {
    /// Minimal configuration for the given task, with every default applied.
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            base_port: DEFAULT_BASE_PORT,
            max_rounds: None,
            rounds_collection: None,
            base_dir: None,
            data_dir: None,
            state_file: None,
            server_entrypoint: None,
            server_command: None,
            server_args: Vec::new(),
            startup_grace_ms: DEFAULT_GRACE_MS,
            shutdown_grace_ms: DEFAULT_GRACE_MS,
            database: DatabaseSettings::default(),
            collections: IndexMap::new(),
            workers: IndexMap::new(),
            extra: Map::new(),
        }
    }

    /// Directory relative paths resolve against.
    pub fn base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Resolves a possibly relative path against the base directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir().join(path)
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        let data_dir = self.data_dir.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        self.resolve_path(&data_dir)
    }

    /// Location of the persisted [`TestState`](crate::TestState).
    pub fn state_path(&self) -> PathBuf {
        let state_file = self.state_file.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));
        if state_file.is_absolute() {
            state_file
        } else {
            self.data_dir().join(state_file)
        }
    }

    /// Directory holding backing store files.
    pub fn database_dir(&self) -> PathBuf {
        match &self.database.path {
            Some(path) => self.resolve_path(path),
            None => self.data_dir(),
        }
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Values seeded into the global state scope on a fresh run.
    pub fn global_values(&self) -> Map<String, Value> {
        let mut values = self.extra.clone();
        values.insert("task_id".into(), Value::String(self.task_id.clone()));
        values.insert("base_port".into(), Value::from(self.base_port));
        if let Some(max_rounds) = self.max_rounds {
            values.insert("max_rounds".into(), Value::from(max_rounds));
        }
        values
    }

    /// Builder form of [`RunnerConfig::apply_overrides`].
    pub fn with_overrides(mut self, overrides: Map<String, Value>) -> Result<Self, serde_json::Error> {
        self.apply_overrides(overrides)?;
        Ok(self)
    }

    /// Merges top-level overrides into the configuration.
    ///
    /// Known fields are replaced wholesale; unknown keys land in `extra`.
    pub fn apply_overrides(&mut self, overrides: Map<String, Value>) -> Result<(), serde_json::Error> {
        if overrides.is_empty() {
            return Ok(());
        }
        let mut document = match serde_json::to_value(&*self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in overrides {
            document.insert(key, value);
        }
        *self = serde_json::from_value(Value::Object(document))?;
        Ok(())
    }
}

fn default_base_port() -> u16 {
    DEFAULT_BASE_PORT
}

fn default_grace_ms() -> u64 {
    DEFAULT_GRACE_MS
}

fn default_database_name() -> String {
    DEFAULT_DATABASE_NAME.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"
task_id: summarizer
base_port: 6000
rounds_collection: todos
middle_server_url: http://localhost:3000
collections:
  todos:
    required_count: 1
    data_file: todos.json
  audits: {}
workers:
  worker1:
    port: 5001
    env:
      WORKER_ID: worker1
    env_vars:
      GITHUB_TOKEN: WORKER1_GITHUB_TOKEN
    keypairs:
      staking: keys/worker1.json
  worker2: {}
"#;

    #[test]
    fn deserializes_yaml_with_pass_through_fields() {
        let config: RunnerConfig = serde_yaml::from_str(SAMPLE).expect("parse config");
        assert_eq!(config.task_id, "summarizer");
        assert_eq!(config.base_port, 6000);
        assert_eq!(config.max_rounds, None);
        assert_eq!(config.extra["middle_server_url"], "http://localhost:3000");

        let names: Vec<_> = config.workers.keys().cloned().collect();
        assert_eq!(names, vec!["worker1", "worker2"]);
        let worker1 = &config.workers["worker1"];
        assert_eq!(worker1.port, Some(5001));
        assert_eq!(worker1.env_vars["GITHUB_TOKEN"], "WORKER1_GITHUB_TOKEN");
        assert_eq!(worker1.extra["keypairs"]["staking"], "keys/worker1.json");

        assert!(config.collections["todos"].is_required());
        assert!(!config.collections["audits"].is_required());
    }

    #[test]
    fn resolves_paths_against_base_dir() {
        let mut config = RunnerConfig::new("task");
        config.base_dir = Some(PathBuf::from("/srv/run"));

        assert_eq!(config.data_dir(), PathBuf::from("/srv/run/data"));
        assert_eq!(config.state_path(), PathBuf::from("/srv/run/data/test_state.json"));
        assert_eq!(config.database_dir(), PathBuf::from("/srv/run/data"));

        config.state_file = Some(PathBuf::from("/tmp/state.json"));
        assert_eq!(config.state_path(), PathBuf::from("/tmp/state.json"));
    }

    #[test]
    fn overrides_replace_known_fields_and_extend_extra() {
        let mut config = RunnerConfig::new("task");
        let overrides = json!({"max_rounds": 4, "middle_server_url": "http://mid"});
        config
            .apply_overrides(overrides.as_object().cloned().unwrap_or_default())
            .expect("apply overrides");

        assert_eq!(config.max_rounds, Some(4));
        assert_eq!(config.extra["middle_server_url"], "http://mid");
        assert_eq!(config.task_id, "task");
    }

    #[test]
    fn global_values_include_task_id_and_extras() {
        let mut config = RunnerConfig::new("task");
        config.extra.insert("middle_server_url".into(), json!("http://mid"));

        let globals = config.global_values();
        assert_eq!(globals["task_id"], "task");
        assert_eq!(globals["middle_server_url"], "http://mid");
        assert!(!globals.contains_key("max_rounds"));
    }
}
