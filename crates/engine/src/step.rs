//! The prepare/execute/validate step protocol.

use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use roundtable_types::{Prepared, RunnerConfig, Scope, StepResult};
use roundtable_workers::{Worker, WorkerError, WorkerManager};
use serde_json::Value;
use tracing::debug;

use crate::{StateError, StateStore};

/// What a step can reach while it runs: the state store, the configuration, and the workers.
pub struct StepContext<'a> {
    pub state: &'a mut StateStore,
    pub config: &'a RunnerConfig,
    pub workers: &'a WorkerManager,
}

impl<'a> StepContext<'a> {
    pub fn new(state: &'a mut StateStore, config: &'a RunnerConfig, workers: &'a WorkerManager) -> Self {
        Self { state, config, workers }
    }

    pub fn round(&self) -> u32 {
        self.state.current_round()
    }

    pub fn get(&self, key: &str) -> Result<Value, StateError> {
        self.state.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value, scope: Scope) -> Result<(), StateError> {
        self.state.set(key, value, scope)
    }

    /// Another worker, e.g. to read a peer's URL.
    pub fn worker(&self, name: &str) -> Result<&Worker, WorkerError> {
        self.workers.get_worker(name)
    }
}

/// Behaviour of one step.
///
/// `prepare` either produces the input for `execute` or skips the step for
/// this round. A skipped step never reaches `execute` and always succeeds.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn prepare(&self, ctx: &mut StepContext<'_>, worker: &Worker) -> Result<Prepared>;

    async fn execute(&self, ctx: &mut StepContext<'_>, worker: &Worker, data: Value) -> Result<StepResult>;

    /// Semantic check of a successful result; an error fails the step.
    fn validate(&self, _data: &Value, _result: &StepResult) -> Result<()> {
        Ok(())
    }
}

/// Immutable descriptor of a step in the sequence.
#[derive(Clone)]
pub struct TestStep {
    pub name: String,
    pub description: String,
    pub worker: String,
    handler: Arc<dyn StepHandler>,
}

impl fmt::Debug for TestStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestStep")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}

impl TestStep {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        worker: impl Into<String>,
        handler: impl StepHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            worker: worker.into(),
            handler: Arc::new(handler),
        }
    }

    /// Runs prepare, then execute, then validate.
    ///
    /// Returns the execute result as-is, so the caller decides what an
    /// unsuccessful result means. Handler errors and validation failures come
    /// back as `Err`.
    pub async fn run(&self, ctx: &mut StepContext<'_>, worker: &Worker) -> Result<StepResult> {
        let prepared = self.handler.prepare(ctx, worker).await?;
        let data = match prepared {
            Prepared::Proceed(data) => data,
            Prepared::Skip { reason } => {
                let reason = reason.unwrap_or_else(|| "nothing to do this round".to_string());
                debug!(step = %self.name, worker = %worker.name(), %reason, "step skipped");
                return Ok(StepResult::no_op(reason));
            }
        };

        let result = self.handler.execute(ctx, worker, data.clone()).await?;
        if result.success {
            self.handler
                .validate(&data, &result)
                .map_err(|error| anyhow!("validation failed: {error:#}"))?;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundtable_types::{TestState, WorkerSettings};
    use serde_json::{Map, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Skipper {
        executed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StepHandler for Skipper {
        async fn prepare(&self, _ctx: &mut StepContext<'_>, _worker: &Worker) -> Result<Prepared> {
            Ok(Prepared::skip("no PR to audit"))
        }

        async fn execute(&self, _ctx: &mut StepContext<'_>, _worker: &Worker, _data: Value) -> Result<StepResult> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            Ok(StepResult::failed("should never run"))
        }
    }

    struct Recorder;

    #[async_trait]
    impl StepHandler for Recorder {
        async fn prepare(&self, ctx: &mut StepContext<'_>, worker: &Worker) -> Result<Prepared> {
            Ok(Prepared::proceed(json!({"round": ctx.round(), "url": worker.url()})))
        }

        async fn execute(&self, ctx: &mut StepContext<'_>, worker: &Worker, data: Value) -> Result<StepResult> {
            ctx.set(&format!("seen.{}", worker.name()), data.clone(), Scope::Round)?;
            Ok(StepResult::ok(data))
        }

        fn validate(&self, data: &Value, _result: &StepResult) -> Result<()> {
            if data["round"] == json!(1) {
                return Ok(());
            }
            Err(anyhow!("unexpected round {}", data["round"]))
        }
    }

    fn fixtures(dir: &std::path::Path) -> (StateStore, RunnerConfig, WorkerManager) {
        let mut config = RunnerConfig::new("task");
        config.server_command = Some("true".into());
        config.workers.insert("worker1".into(), WorkerSettings::default());
        let manager = WorkerManager::new(&config).expect("manager");
        let store = StateStore::create(&dir.join("state.json"), TestState::fresh(Map::new())).expect("state");
        (store, config, manager)
    }

    #[tokio::test]
    async fn skipped_steps_succeed_without_executing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, config, manager) = fixtures(dir.path());
        let executed = Arc::new(AtomicUsize::new(0));
        let step = TestStep::new("audit", "audit PR", "worker1", Skipper { executed: executed.clone() });

        let worker = manager.get_worker("worker1").expect("worker");
        let mut ctx = StepContext::new(&mut store, &config, &manager);
        let result = step.run(&mut ctx, worker).await.expect("run");

        assert!(result.success);
        assert_eq!(result.message.as_deref(), Some("no PR to audit"));
        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn steps_write_round_state_and_validate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, config, manager) = fixtures(dir.path());
        let step = TestStep::new("record", "record url", "worker1", Recorder);
        let worker = manager.get_worker("worker1").expect("worker");

        {
            let mut ctx = StepContext::new(&mut store, &config, &manager);
            assert!(step.run(&mut ctx, worker).await.expect("round 1").success);
        }
        assert_eq!(
            store.get("seen.worker1.url").expect("recorded"),
            json!("http://localhost:5001")
        );

        store.next_round().expect("advance");
        let mut ctx = StepContext::new(&mut store, &config, &manager);
        let err = step.run(&mut ctx, worker).await.expect_err("validation rejects round 2");
        assert!(err.to_string().contains("validation failed"));
    }
}
