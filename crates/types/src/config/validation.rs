//! Configuration validation for runner configs.

use std::collections::HashMap;

use regex::Regex;
use thiserror::Error;

use crate::config::{RunnerConfig, WorkerSettings};

/// Validate the entire runner configuration.
pub fn validate_config(config: &RunnerConfig) -> Result<(), ConfigValidationError> {
    if config.task_id.trim().is_empty() {
        return Err(ConfigValidationError::MissingRequiredField {
            field: "task_id".to_string(),
        });
    }

    if config.max_rounds == Some(0) {
        return Err(ConfigValidationError::InvalidValue {
            field: "max_rounds".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    if let Some(collection) = &config.rounds_collection
        && collection.trim().is_empty()
    {
        return Err(ConfigValidationError::InvalidValue {
            field: "rounds_collection".to_string(),
            reason: "cannot be empty".to_string(),
        });
    }

    let mut claimed_ports: HashMap<u16, &str> = HashMap::new();
    for (name, worker) in &config.workers {
        validate_worker_name(name)?;
        validate_worker(name, worker)?;
        if let Some(port) = worker.port
            && let Some(previous) = claimed_ports.insert(port, name.as_str())
        {
            return Err(ConfigValidationError::DuplicatePort {
                port,
                first: previous.to_string(),
                second: name.clone(),
            });
        }
    }

    Ok(())
}

/// Validate a worker name.
pub fn validate_worker_name(name: &str) -> Result<(), ConfigValidationError> {
    if name.trim().is_empty() {
        return Err(ConfigValidationError::InvalidWorkerName {
            name: name.to_string(),
            reason: "Worker name cannot be empty".to_string(),
        });
    }

    let name_regex = Regex::new(r"^[A-Za-z0-9._-]+$")?;
    if !name_regex.is_match(name) {
        return Err(ConfigValidationError::InvalidWorkerName {
            name: name.to_string(),
            reason: "Worker name must contain only letters, numbers, dots, underscores, and hyphens".to_string(),
        });
    }

    Ok(())
}

fn validate_worker(name: &str, worker: &WorkerSettings) -> Result<(), ConfigValidationError> {
    if worker.port == Some(0) {
        return Err(ConfigValidationError::InvalidValue {
            field: format!("workers.{name}.port"),
            reason: "must be a non-zero port".to_string(),
        });
    }

    for key in worker.env.keys().chain(worker.env_vars.keys()) {
        validate_env_key(key)?;
    }
    for source in worker.env_vars.values() {
        validate_env_key(source)?;
    }

    Ok(())
}

fn validate_env_key(key: &str) -> Result<(), ConfigValidationError> {
    let key_regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")?;
    if !key_regex.is_match(key) {
        return Err(ConfigValidationError::InvalidEnvKey { key: key.to_string() });
    }
    Ok(())
}

/// Errors that can occur during configuration validation.
#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {field}")]
    MissingRequiredField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid worker name '{name}': {reason}")]
    InvalidWorkerName { name: String, reason: String },

    #[error("Invalid environment variable name: {key}")]
    InvalidEnvKey { key: String },

    #[error("Port {port} is claimed by both '{first}' and '{second}'")]
    DuplicatePort { port: u16, first: String, second: String },

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}
