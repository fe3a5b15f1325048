//! Registry and lifecycle of all configured workers.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use roundtable_types::RunnerConfig;
use tracing::{error, info};

use crate::{LaunchSpec, TracingSink, Worker, WorkerError, WorkerOutputSink, WorkerProcess};

/// Owns every worker process of a run.
///
/// Workers are registered at construction, in configuration order, so
/// [`WorkerManager::get_worker`] works before anything is started.
#[derive(Debug)]
pub struct WorkerManager {
    processes: IndexMap<String, WorkerProcess>,
}

impl WorkerManager {
    pub fn new(config: &RunnerConfig) -> Result<Self, WorkerError> {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    /// Like [`WorkerManager::new`], forwarding worker output to `sink`.
    pub fn with_sink(config: &RunnerConfig, sink: Arc<dyn WorkerOutputSink>) -> Result<Self, WorkerError> {
        let mut processes = IndexMap::new();
        if config.workers.is_empty() {
            return Ok(Self { processes });
        }

        let base_launch = base_launch_spec(config)?;
        let data_dir = config.data_dir();
        let mut assigned: HashMap<u16, &str> = HashMap::new();
        for (index, (name, settings)) in config.workers.iter().enumerate() {
            let port = match settings.port {
                Some(port) => port,
                None => sequential_port(config.base_port, index).ok_or_else(|| WorkerError::PortExhausted {
                    name: name.clone(),
                    base_port: config.base_port,
                })?,
            };
            if let Some(owner) = assigned.insert(port, name.as_str()) {
                return Err(WorkerError::PortConflict {
                    name: name.clone(),
                    port,
                    owner: owner.to_string(),
                });
            }

            let mut launch = base_launch.clone();
            launch.args.extend(settings.args.iter().cloned());

            let worker = Worker::new(name.clone(), port, settings.clone());
            let process = WorkerProcess::new(
                worker,
                launch,
                &data_dir,
                config.startup_grace(),
                config.shutdown_grace(),
                sink.clone(),
            );
            processes.insert(name.clone(), process);
        }
        Ok(Self { processes })
    }

    /// Starts every worker in declaration order.
    ///
    /// If one fails, the workers already started are stopped before the
    /// error is returned.
    pub async fn start_all(&mut self) -> Result<(), WorkerError> {
        let names: Vec<String> = self.processes.keys().cloned().collect();
        for name in names {
            let Some(process) = self.processes.get_mut(&name) else {
                continue;
            };
            if let Err(err) = process.start().await {
                error!(worker = %name, error = %err, "worker failed to start; stopping started workers");
                self.shutdown().await;
                return Err(err);
            }
        }
        info!(count = self.processes.len(), "all workers started");
        Ok(())
    }

    /// Stops every worker; never fails.
    pub async fn shutdown(&mut self) {
        for process in self.processes.values_mut() {
            process.stop().await;
        }
    }

    pub fn get_worker(&self, name: &str) -> Result<&Worker, WorkerError> {
        self.processes
            .get(name)
            .map(WorkerProcess::worker)
            .ok_or_else(|| WorkerError::not_found(name))
    }

    pub fn workers(&self) -> impl Iterator<Item = &Worker> {
        self.processes.values().map(WorkerProcess::worker)
    }

    pub fn process(&self, name: &str) -> Option<&WorkerProcess> {
        self.processes.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

fn sequential_port(base_port: u16, index: usize) -> Option<u16> {
    let offset = u16::try_from(index).ok()?.checked_add(1)?;
    base_port.checked_add(offset)
}

/// Launch spec shared by all workers before per-worker arguments are appended.
fn base_launch_spec(config: &RunnerConfig) -> Result<LaunchSpec, WorkerError> {
    let entrypoint = config.server_entrypoint.as_deref().map(|path| config.resolve_path(path));
    let (program, mut args) = match (&config.server_command, entrypoint) {
        (Some(command), Some(entrypoint)) => (command.into(), vec![entrypoint.display().to_string()]),
        (Some(command), None) => (command.into(), Vec::new()),
        (None, Some(entrypoint)) => (entrypoint, Vec::new()),
        (None, None) => return Err(WorkerError::MissingEntrypoint),
    };
    args.extend(config.server_args.iter().cloned());
    Ok(LaunchSpec {
        program,
        args,
        current_dir: config.base_dir(),
    })
}
