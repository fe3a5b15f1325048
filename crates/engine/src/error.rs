use roundtable_store::StoreError;
use roundtable_workers::WorkerError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by the scoped state store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Key not found in any scope: {key}")]
    NotFound { key: String },

    #[error("Key '{key}' cannot be written in execution scope")]
    InvalidScope { key: String },

    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("State file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StateError {
    pub fn not_found(key: &str) -> Self {
        StateError::NotFound { key: key.to_string() }
    }

    pub fn invalid_value(key: &str, reason: impl Into<String>) -> Self {
        StateError::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Everything that can end a run.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("Step '{step}' failed in round {round}: {reason}")]
    StepFailed { step: String, round: u32, reason: String },

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Run interrupted")]
    Interrupted,
}

impl RunnerError {
    pub fn configuration(message: impl Into<String>) -> Self {
        RunnerError::Configuration { message: message.into() }
    }
}

impl From<ConfigError> for RunnerError {
    fn from(error: ConfigError) -> Self {
        RunnerError::configuration(error.to_string())
    }
}
