//! One supervised worker subprocess.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use roundtable_types::WorkerSettings;
use roundtable_util::redact_sensitive;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::output::{OutputStream, StderrTail, WorkerOutputSink, spawn_output_drain};
use crate::{Worker, WorkerError};

/// How long to wait for output drains to hit EOF once the child has exited.
const DRAIN_SETTLE: Duration = Duration::from_millis(500);

/// Program, arguments, and working directory used to launch a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub current_dir: PathBuf,
}

/// A worker subprocess plus its output drains.
///
/// The environment is materialized once at construction. Dropping the
/// process kills the child.
pub struct WorkerProcess {
    worker: Worker,
    launch: LaunchSpec,
    env: BTreeMap<String, String>,
    startup_grace: Duration,
    shutdown_grace: Duration,
    sink: Arc<dyn WorkerOutputSink>,
    child: Option<Child>,
    drains: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    stderr_tail: StderrTail,
}

impl std::fmt::Debug for WorkerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerProcess")
            .field("name", &self.worker.name())
            .field("port", &self.worker.port())
            .field("launch", &self.launch)
            .field("running", &self.child.is_some())
            .finish()
    }
}

impl WorkerProcess {
    pub fn new(
        worker: Worker,
        launch: LaunchSpec,
        data_dir: &Path,
        startup_grace: Duration,
        shutdown_grace: Duration,
        sink: Arc<dyn WorkerOutputSink>,
    ) -> Self {
        let env = materialize_env(worker.name(), worker.port(), worker.settings(), data_dir);
        Self {
            worker,
            launch,
            env,
            startup_grace,
            shutdown_grace,
            sink,
            child: None,
            drains: Vec::new(),
            cancel: CancellationToken::new(),
            stderr_tail: StderrTail::default(),
        }
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    pub fn name(&self) -> &str {
        self.worker.name()
    }

    pub fn launch(&self) -> &LaunchSpec {
        &self.launch
    }

    /// Environment the child is launched with.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.launch.program);
        cmd.args(&self.launch.args)
            .env_clear()
            .envs(&self.env)
            .current_dir(&self.launch.current_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Spawns the worker and waits out the startup grace period.
    ///
    /// Fails with the captured stderr if the process exits before the grace
    /// period ends.
    pub async fn start(&mut self) -> Result<(), WorkerError> {
        if self.child.is_some() {
            return Ok(());
        }
        let name = self.name().to_string();
        debug!(
            worker = %name,
            program = %self.launch.program.display(),
            args = %redact_sensitive(&self.launch.args.join(" ")),
            "spawning worker"
        );

        let mut child = self
            .command()
            .spawn()
            .map_err(|source| WorkerError::Spawn { name: name.clone(), source })?;

        self.cancel = CancellationToken::new();
        self.stderr_tail = StderrTail::default();
        if let Some(stdout) = child.stdout.take() {
            self.drains.push(spawn_output_drain(
                name.clone(),
                OutputStream::Stdout,
                stdout,
                self.sink.clone(),
                None,
                self.cancel.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            self.drains.push(spawn_output_drain(
                name.clone(),
                OutputStream::Stderr,
                stderr,
                self.sink.clone(),
                Some(self.stderr_tail.clone()),
                self.cancel.clone(),
            ));
        }

        sleep(self.startup_grace).await;

        match child.try_wait() {
            Ok(None) => {
                info!(worker = %name, port = self.worker.port(), "worker started");
                self.child = Some(child);
                Ok(())
            }
            Ok(Some(status)) => {
                self.settle_drains().await;
                Err(WorkerError::StartupFailed {
                    name,
                    status: status.to_string(),
                    stderr: self.stderr_tail.snapshot(),
                })
            }
            Err(source) => {
                self.cancel.cancel();
                Err(WorkerError::Process { name, source })
            }
        }
    }

    /// Terminates gracefully, escalating to a kill after the shutdown grace period.
    ///
    /// A process that is already gone is not an error.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            self.cancel.cancel();
            return;
        };
        let name = self.name().to_string();

        request_termination(&name, &mut child);
        match timeout(self.shutdown_grace, child.wait()).await {
            Ok(Ok(status)) => debug!(worker = %name, %status, "worker exited"),
            Ok(Err(error)) => debug!(worker = %name, %error, "worker already gone"),
            Err(_) => {
                warn!(worker = %name, "worker ignored termination; killing");
                if let Err(error) = child.kill().await {
                    debug!(worker = %name, %error, "kill failed; worker already gone");
                }
            }
        }

        self.settle_drains().await;
        info!(worker = %name, "worker stopped");
    }

    async fn settle_drains(&mut self) {
        for drain in self.drains.drain(..) {
            if timeout(DRAIN_SETTLE, drain).await.is_err() {
                debug!("output drain still open after worker exit");
            }
        }
        self.cancel.cancel();
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        // kill_on_drop reaps the child itself.
        self.cancel.cancel();
    }
}

#[cfg(unix)]
fn request_termination(name: &str, child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: pid comes from a child we spawned and have not yet reaped.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        debug!(worker = %name, error = %std::io::Error::last_os_error(), "SIGTERM not delivered");
    }
}

#[cfg(not(unix))]
fn request_termination(name: &str, child: &mut Child) {
    if let Err(error) = child.start_kill() {
        debug!(worker = %name, %error, "termination not delivered");
    }
}

/// Inherited environment, then literal overrides, then mapped parent
/// variables, then the computed `PORT` and `DATABASE_PATH`.
fn materialize_env(name: &str, port: u16, settings: &WorkerSettings, data_dir: &Path) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = std::env::vars().collect();

    for (key, value) in &settings.env {
        env.insert(key.clone(), value.clone());
    }
    for (child_key, parent_key) in &settings.env_vars {
        match std::env::var(parent_key) {
            Ok(value) => {
                env.insert(child_key.clone(), value);
            }
            Err(_) => warn!(worker = %name, variable = %parent_key, "mapped environment variable is not set"),
        }
    }

    env.entry("WORKER_ID".to_string()).or_insert_with(|| name.to_string());
    env.insert("PORT".to_string(), port.to_string());
    env.insert("DATABASE_PATH".to_string(), data_dir.join(name).display().to_string());
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_layers_overrides_mappings_and_computed_values() {
        temp_env::with_vars(
            [
                ("ROUNDTABLE_PARENT_TOKEN", Some("from-parent")),
                ("ROUNDTABLE_UNSET_PARENT", None::<&str>),
                ("PORT", Some("1")),
            ],
            || {
                let mut settings = WorkerSettings::default();
                settings.env.insert("STAKING_KEY".into(), "literal".into());
                settings.env.insert("PORT".into(), "2".into());
                settings.env_vars.insert("GITHUB_TOKEN".into(), "ROUNDTABLE_PARENT_TOKEN".into());
                settings.env_vars.insert("MISSING".into(), "ROUNDTABLE_UNSET_PARENT".into());

                let env = materialize_env("worker1", 5001, &settings, Path::new("/tmp/data"));
                assert_eq!(env.get("STAKING_KEY").map(String::as_str), Some("literal"));
                assert_eq!(env.get("GITHUB_TOKEN").map(String::as_str), Some("from-parent"));
                assert_eq!(env.get("PORT").map(String::as_str), Some("5001"));
                assert_eq!(env.get("DATABASE_PATH").map(String::as_str), Some("/tmp/data/worker1"));
                assert_eq!(env.get("WORKER_ID").map(String::as_str), Some("worker1"));
                assert!(!env.contains_key("MISSING"));
            },
        );
    }
}
