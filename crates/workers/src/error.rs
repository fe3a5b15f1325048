use thiserror::Error;

/// Errors raised while supervising worker processes.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Worker not found: {name}")]
    NotFound { name: String },

    #[error("Worker '{name}' exited during startup ({status}): {stderr}")]
    StartupFailed { name: String, status: String, stderr: String },

    #[error("Failed to spawn worker '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to query worker '{name}' process state: {source}")]
    Process {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No port left for worker '{name}' above base port {base_port}")]
    PortExhausted { name: String, base_port: u16 },

    #[error("Port {port} of worker '{name}' is already assigned to '{owner}'")]
    PortConflict { name: String, port: u16, owner: String },

    #[error("No server entrypoint or command configured for workers")]
    MissingEntrypoint,
}

impl WorkerError {
    pub fn not_found(name: &str) -> Self {
        WorkerError::NotFound { name: name.to_string() }
    }
}
