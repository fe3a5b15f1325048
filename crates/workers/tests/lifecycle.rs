#![cfg(unix)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use roundtable_types::{RunnerConfig, WorkerSettings};
use roundtable_workers::{OutputStream, WorkerError, WorkerManager, WorkerOutputSink};

#[derive(Default)]
struct CollectingSink(Mutex<Vec<(String, OutputStream, String)>>);

impl CollectingSink {
    fn lines(&self) -> Vec<(String, OutputStream, String)> {
        self.0.lock().map(|lines| lines.clone()).unwrap_or_default()
    }
}

impl WorkerOutputSink for CollectingSink {
    fn line(&self, worker: &str, stream: OutputStream, line: &str) {
        if let Ok(mut lines) = self.0.lock() {
            lines.push((worker.to_string(), stream, line.to_string()));
        }
    }
}

fn shell_config(dir: &std::path::Path, script: &str) -> RunnerConfig {
    let mut config = RunnerConfig::new("task");
    config.base_dir = Some(dir.to_path_buf());
    config.server_command = Some("/bin/sh".into());
    config.server_args = vec!["-c".into(), script.into()];
    config.startup_grace_ms = 300;
    config.shutdown_grace_ms = 2_000;
    config
}

#[tokio::test]
async fn workers_start_receive_env_and_stop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = shell_config(dir.path(), r#"echo "ready on $PORT as $WORKER_ID with $GREETING"; exec sleep 30"#);
    config.workers.insert(
        "worker1".into(),
        WorkerSettings {
            env: [("GREETING".to_string(), "hello".to_string())].into_iter().collect(),
            ..Default::default()
        },
    );
    config.workers.insert("worker2".into(), WorkerSettings::default());

    let sink = Arc::new(CollectingSink::default());
    let mut manager = WorkerManager::with_sink(&config, sink.clone()).expect("manager");
    manager.start_all().await.expect("start");
    assert!(manager.process("worker1").expect("worker1").is_running());
    assert!(manager.process("worker2").expect("worker2").is_running());

    manager.shutdown().await;
    assert!(!manager.process("worker1").expect("worker1").is_running());

    let lines = sink.lines();
    assert!(lines.contains(&(
        "worker1".to_string(),
        OutputStream::Stdout,
        "ready on 5001 as worker1 with hello".to_string()
    )));
    assert!(lines.iter().any(|(worker, _, line)| worker == "worker2" && line == "ready on 5002 as worker2 with "));
}

#[tokio::test]
async fn early_exit_reports_stderr_and_stops_started_peers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = shell_config(dir.path(), r#"if [ "$WORKER_ID" = "worker2" ]; then echo "bind failed" >&2; exit 3; fi; exec sleep 30"#);
    config.workers.insert("worker1".into(), WorkerSettings::default());
    config.workers.insert("worker2".into(), WorkerSettings::default());

    let mut manager = WorkerManager::new(&config).expect("manager");
    let err = manager.start_all().await.expect_err("worker2 exits");
    match err {
        WorkerError::StartupFailed { name, stderr, .. } => {
            assert_eq!(name, "worker2");
            assert_eq!(stderr, "bind failed");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!manager.process("worker1").expect("worker1").is_running());
}

#[tokio::test]
async fn stubborn_worker_is_killed_after_grace() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = shell_config(dir.path(), r#"trap '' TERM; while true; do sleep 1; done"#);
    config.shutdown_grace_ms = 200;
    config.workers.insert("worker1".into(), WorkerSettings::default());

    let mut manager = WorkerManager::new(&config).expect("manager");
    manager.start_all().await.expect("start");

    let started = Instant::now();
    manager.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!manager.process("worker1").expect("worker1").is_running());
}

#[tokio::test]
async fn missing_program_is_a_spawn_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = RunnerConfig::new("task");
    config.base_dir = Some(dir.path().to_path_buf());
    config.server_entrypoint = Some(PathBuf::from("does-not-exist"));
    config.workers.insert("worker1".into(), WorkerSettings::default());

    let mut manager = WorkerManager::new(&config).expect("manager");
    assert!(matches!(manager.start_all().await, Err(WorkerError::Spawn { .. })));
}

#[tokio::test]
async fn stopping_twice_is_harmless() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = shell_config(dir.path(), "exec sleep 30");
    config.workers.insert("worker1".into(), WorkerSettings::default());

    let mut manager = WorkerManager::new(&config).expect("manager");
    manager.start_all().await.expect("start");
    manager.shutdown().await;
    manager.shutdown().await;
}
