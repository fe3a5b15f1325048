//! Loading runner configuration files.
//!
//! Files are YAML unless they carry a `.json` extension. Loading applies
//! `${env:NAME}` interpolation, caller overrides, tilde expansion, base
//! directory resolution, and validation, in that order.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use roundtable_types::{ConfigValidationError, RunnerConfig, validate_config};
use roundtable_util::{InterpolationError, expand_tilde, expand_tilde_path, interpolate_json};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "ROUNDTABLE_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "roundtable.yaml";

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error(transparent)]
    Interpolation(#[from] InterpolationError),

    #[error(transparent)]
    Validation(#[from] ConfigValidationError),
}

/// Returns the configuration path from `ROUNDTABLE_CONFIG`, or `roundtable.yaml`.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

pub fn load_config_from_path(path: &Path) -> Result<RunnerConfig, ConfigError> {
    load_config_with_overrides(path, Map::new())
}

/// Loads `path`, merging `overrides` over its top-level keys before validation.
pub fn load_config_with_overrides(path: &Path, overrides: Map<String, Value>) -> Result<RunnerConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut raw = parse_document(path, &content)?;
    interpolate_json(&mut raw)?;

    let config: RunnerConfig = serde_json::from_value(raw).map_err(|error| parse_error(path, error))?;
    let mut config = config.with_overrides(overrides).map_err(|error| parse_error(path, error))?;

    let config_dir = path.parent().filter(|dir| !dir.as_os_str().is_empty()).unwrap_or(Path::new("."));
    normalize_paths(&mut config, config_dir);
    validate_config(&config)?;

    debug!(path = %path.display(), task_id = %config.task_id, workers = config.workers.len(), "loaded runner configuration");
    Ok(config)
}

fn parse_document(path: &Path, content: &str) -> Result<Value, ConfigError> {
    let is_json = path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
    if is_json {
        return serde_json::from_str(content).map_err(|error| parse_error(path, error));
    }
    let value: Value = serde_yaml::from_str(content).map_err(|error| parse_error(path, error))?;
    // An empty YAML document parses as null.
    Ok(if value.is_null() { Value::Object(Map::new()) } else { value })
}

fn parse_error(path: &Path, error: impl std::fmt::Display) -> ConfigError {
    ConfigError::Parse {
        path: path.to_path_buf(),
        reason: error.to_string(),
    }
}

/// Expands `~` in every path field and anchors the base directory at `config_dir`.
fn normalize_paths(config: &mut RunnerConfig, config_dir: &Path) {
    let base_dir = match config.base_dir.as_deref().map(expand_tilde_path) {
        Some(dir) if dir.is_absolute() => dir,
        Some(dir) => config_dir.join(dir),
        None => config_dir.to_path_buf(),
    };
    config.base_dir = Some(base_dir);

    for path in [
        &mut config.data_dir,
        &mut config.state_file,
        &mut config.server_entrypoint,
        &mut config.database.path,
    ]
    .into_iter()
    .flatten()
    {
        *path = expand_tilde_path(path);
    }
    for spec in config.collections.values_mut() {
        if let Some(path) = spec.data_file.as_mut() {
            *path = expand_tilde_path(path);
        }
    }
}
