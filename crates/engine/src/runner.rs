//! Round/resume state machine.
//!
//! A run either starts FRESH (backing store reseeded, state rebuilt) or
//! RESUMES right after the last step recorded as completed. Steps run
//! strictly in order; the first failure ends the run with progress intact, so
//! the next attempt retries exactly that step.

use std::fmt;
use std::future::{Future, pending};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use roundtable_store::{DocumentStore, FixtureReconciler, PostSeedHook, StoreError, open_database, task_filter};
use roundtable_types::{RunnerConfig, TestState, validate_config};
use roundtable_workers::{TracingSink, WorkerManager, WorkerOutputSink};
use tracing::{error, info, warn};

use crate::step::{StepContext, TestStep};
use crate::{RunnerError, StateStore};

/// Opens the backing store for a configuration.
pub type StoreFactory = Arc<dyn Fn(&RunnerConfig) -> Result<Arc<dyn DocumentStore>, StoreError> + Send + Sync>;

/// States of the run, logged as the machine moves between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Fresh,
    Resuming,
    RunningRound,
    RoundComplete,
    AllComplete,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunPhase::Fresh => "fresh",
            RunPhase::Resuming => "resuming",
            RunPhase::RunningRound => "running_round",
            RunPhase::RoundComplete => "round_complete",
            RunPhase::AllComplete => "all_complete",
            RunPhase::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Summary of a run that reached the final round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Rounds finished by this invocation, counting a resumed partial round.
    pub rounds_completed: u32,
    pub final_round: u32,
    pub phase: RunPhase,
}

pub struct TestRunner {
    steps: Vec<TestStep>,
    config: RunnerConfig,
    store_factory: StoreFactory,
    store: OnceCell<Arc<dyn DocumentStore>>,
    max_rounds: OnceCell<u32>,
    post_seed: Option<PostSeedHook>,
    output_sink: Arc<dyn WorkerOutputSink>,
}

impl fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestRunner")
            .field("steps", &self.steps)
            .field("task_id", &self.config.task_id)
            .field("max_rounds", &self.max_rounds.get())
            .finish_non_exhaustive()
    }
}

impl TestRunner {
    /// Validates the configuration and the step sequence.
    ///
    /// Step names must be unique and every step must target a configured worker.
    pub fn new(steps: Vec<TestStep>, config: RunnerConfig) -> Result<Self, RunnerError> {
        validate_config(&config).map_err(|error| RunnerError::configuration(error.to_string()))?;
        for (index, step) in steps.iter().enumerate() {
            if steps[..index].iter().any(|earlier| earlier.name == step.name) {
                return Err(RunnerError::configuration(format!("duplicate step name '{}'", step.name)));
            }
            if !config.workers.contains_key(&step.worker) {
                return Err(RunnerError::configuration(format!(
                    "step '{}' targets unknown worker '{}'",
                    step.name, step.worker
                )));
            }
        }

        Ok(Self {
            steps,
            config,
            store_factory: Arc::new(|config: &RunnerConfig| open_database(&config.database, &config.database_dir())),
            store: OnceCell::new(),
            max_rounds: OnceCell::new(),
            post_seed: None,
            output_sink: Arc::new(TracingSink),
        })
    }

    /// Uses an already-open store instead of opening one from the configuration.
    pub fn with_store(self, store: Arc<dyn DocumentStore>) -> Self {
        let factory: StoreFactory =
            Arc::new(move |_: &RunnerConfig| -> Result<Arc<dyn DocumentStore>, StoreError> { Ok(store.clone()) });
        self.with_store_factory(factory)
    }

    pub fn with_store_factory(mut self, factory: StoreFactory) -> Self {
        self.store_factory = factory;
        self.store = OnceCell::new();
        self
    }

    pub fn with_post_seed(mut self, hook: PostSeedHook) -> Self {
        self.post_seed = Some(hook);
        self
    }

    pub fn with_output_sink(mut self, sink: Arc<dyn WorkerOutputSink>) -> Self {
        self.output_sink = sink;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn steps(&self) -> &[TestStep] {
        &self.steps
    }

    /// Backing store, opened on first use and reused afterwards.
    pub fn store(&self) -> Result<&Arc<dyn DocumentStore>, RunnerError> {
        Ok(self.store.get_or_try_init(|| (self.store_factory)(&self.config))?)
    }

    /// Total rounds for the run, resolved once.
    ///
    /// An explicit `max_rounds` wins. Otherwise it is the number of task
    /// documents in `rounds_collection` plus one for the seed round.
    pub fn max_rounds(&self) -> Result<u32, RunnerError> {
        self.max_rounds
            .get_or_try_init(|| -> Result<u32, RunnerError> {
                if let Some(max_rounds) = self.config.max_rounds {
                    return Ok(max_rounds);
                }
                let collection = self.config.rounds_collection.as_deref().ok_or_else(|| {
                    RunnerError::configuration("max_rounds is not set and no rounds_collection is designated")
                })?;
                let count = self
                    .store()?
                    .count_documents(collection, &task_filter(&self.config.task_id))?;
                let max_rounds = u32::try_from(count)
                    .ok()
                    .and_then(|count| count.checked_add(1))
                    .ok_or_else(|| RunnerError::configuration(format!("round count from '{collection}' is out of range")))?;
                info!(collection = %collection, documents = count, max_rounds, "derived round count from backing store");
                Ok(max_rounds)
            })
            .copied()
    }

    pub fn reconciler(&self) -> Result<FixtureReconciler, RunnerError> {
        let reconciler = FixtureReconciler::new(self.store()?.clone(), &self.config);
        Ok(match &self.post_seed {
            Some(hook) => reconciler.with_post_seed(hook.clone()),
            None => reconciler,
        })
    }

    /// Reseeds the backing store if forced or inconsistent; returns whether it did.
    pub fn ensure_clean_state(&self, force: bool) -> Result<bool, RunnerError> {
        Ok(self.reconciler()?.ensure_clean_state(force)?)
    }

    /// Persisted state, if any.
    pub fn load_state(&self) -> Result<Option<StateStore>, RunnerError> {
        Ok(StateStore::load(&self.config.state_path())?)
    }

    /// Deletes persisted state and reseeds the backing store without running anything.
    pub fn reset(&self) -> Result<(), RunnerError> {
        StateStore::delete(&self.config.state_path())?;
        self.reconciler()?.reset_and_reseed()?;
        info!(task_id = %self.config.task_id, "state reset");
        Ok(())
    }

    /// Starts the workers and runs to completion, stopping early on Ctrl-C.
    pub async fn run(&self, force_reset: bool) -> Result<RunOutcome, RunnerError> {
        let interrupt = async {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("interrupt handler unavailable; run cannot be interrupted");
                pending::<()>().await;
            }
        };
        self.run_until(force_reset, interrupt).await
    }

    /// Like [`TestRunner::run`], treating completion of `interrupt` as an interrupt.
    ///
    /// Workers are stopped before this returns, whatever the outcome.
    pub async fn run_until<F>(&self, force_reset: bool, interrupt: F) -> Result<RunOutcome, RunnerError>
    where
        F: Future<Output = ()>,
    {
        let mut workers = WorkerManager::with_sink(&self.config, self.output_sink.clone())?;

        let result = tokio::select! {
            result = self.start_and_drive(&mut workers, force_reset) => result,
            _ = interrupt => {
                warn!("run interrupted; stopping workers");
                Err(RunnerError::Interrupted)
            }
        };

        workers.shutdown().await;
        if let Err(err) = &result {
            error!(error = %err, "run ended with an error");
        }
        result
    }

    async fn start_and_drive(&self, workers: &mut WorkerManager, force_reset: bool) -> Result<RunOutcome, RunnerError> {
        workers.start_all().await?;
        self.run_steps(workers, force_reset).await
    }

    /// Runs the state machine against workers the caller manages.
    pub async fn run_steps(&self, workers: &WorkerManager, force_reset: bool) -> Result<RunOutcome, RunnerError> {
        let (mut state, start_index) = self.prepare_state(force_reset)?;
        self.drive_rounds(&mut state, workers, start_index).await
    }

    /// Loads or rebuilds state; returns it with the index of the first step to run.
    fn prepare_state(&self, force_reset: bool) -> Result<(StateStore, usize), RunnerError> {
        let existing = if force_reset { None } else { self.load_state()? };

        if let Some(state) = existing
            && let Some(last) = state.last_completed_step()
        {
            let position = self.steps.iter().position(|step| step.name == last).ok_or_else(|| {
                RunnerError::configuration(format!("persisted step '{last}' is not part of the step sequence"))
            })?;
            info!(
                phase = %RunPhase::Resuming,
                round = state.current_round(),
                after = %last,
                "resuming from persisted state"
            );
            return Ok((state, position + 1));
        }

        info!(phase = %RunPhase::Fresh, force_reset, "starting from a clean slate");
        self.reconciler()?.reset_and_reseed()?;
        let state = StateStore::create(&self.config.state_path(), TestState::fresh(self.config.global_values()))?;
        Ok((state, 0))
    }

    async fn drive_rounds(
        &self,
        state: &mut StateStore,
        workers: &WorkerManager,
        mut start_index: usize,
    ) -> Result<RunOutcome, RunnerError> {
        let max_rounds = self.max_rounds()?;
        let mut rounds_completed = 0;

        loop {
            let round = state.current_round();
            info!(phase = %RunPhase::RunningRound, round, max_rounds, first_step = start_index, "running round");

            for step in &self.steps[start_index..] {
                self.run_step(step, state, workers, round).await?;
            }
            rounds_completed += 1;

            if round >= max_rounds {
                info!(phase = %RunPhase::AllComplete, round, "all rounds complete");
                return Ok(RunOutcome {
                    rounds_completed,
                    final_round: round,
                    phase: RunPhase::AllComplete,
                });
            }

            state.next_round()?;
            start_index = 0;
            info!(phase = %RunPhase::RoundComplete, round, next_round = state.current_round(), "round complete");
        }
    }

    async fn run_step(
        &self,
        step: &TestStep,
        state: &mut StateStore,
        workers: &WorkerManager,
        round: u32,
    ) -> Result<(), RunnerError> {
        let worker = workers.get_worker(&step.worker)?;
        info!(step = %step.name, worker = %step.worker, round, "{}", step.description);

        let outcome = {
            let mut ctx = StepContext::new(state, &self.config, workers);
            step.run(&mut ctx, worker).await
        };

        let reason = match outcome {
            Ok(result) if result.success => {
                state.mark_step_completed(&step.name)?;
                info!(step = %step.name, round, message = result.message.as_deref().unwrap_or(""), "step succeeded");
                return Ok(());
            }
            Ok(result) => result.message.unwrap_or_else(|| "step reported failure".to_string()),
            Err(error) => format!("{error:#}"),
        };

        error!(phase = %RunPhase::Failed, step = %step.name, round, reason = %reason, "step failed");
        Err(RunnerError::StepFailed {
            step: step.name.clone(),
            round,
            reason,
        })
    }
}
