//! Built-in step sequence driven by `roundtable run`.
//!
//! `fetch` pulls test data from the first worker and `process` hands it to
//! the second. Both keep their results in round state, so a resumed run only
//! repeats what the crash interrupted.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use roundtable_engine::{StepContext, StepHandler, TestStep};
use roundtable_types::{Prepared, Scope, StepResult};
use roundtable_workers::Worker;
use serde_json::{Value, json};

pub const FETCH_WORKER: &str = "worker1";
pub const PROCESS_WORKER: &str = "worker2";

pub fn steps() -> Vec<TestStep> {
    vec![
        TestStep::new("fetch", "Fetch test data", FETCH_WORKER, FetchStep),
        TestStep::new("process", "Process fetched data", PROCESS_WORKER, ProcessStep),
    ]
}

fn fetched_key() -> String {
    format!("fetched.{FETCH_WORKER}")
}

struct FetchStep;

#[async_trait]
impl StepHandler for FetchStep {
    async fn prepare(&self, ctx: &mut StepContext<'_>, _worker: &Worker) -> Result<Prepared> {
        Ok(Prepared::proceed(json!({
            "taskId": ctx.config.task_id,
            "round": ctx.round(),
        })))
    }

    async fn execute(&self, ctx: &mut StepContext<'_>, worker: &Worker, _data: Value) -> Result<StepResult> {
        let response = worker
            .get("/test-endpoint")
            .await
            .with_context(|| format!("fetching test data from {}", worker.name()))?;
        let result = response.into_step_result();
        if result.success && !result.data.is_null() {
            ctx.set(&fetched_key(), result.data.clone(), Scope::Round)?;
        }
        Ok(result)
    }
}

struct ProcessStep;

#[async_trait]
impl StepHandler for ProcessStep {
    async fn prepare(&self, ctx: &mut StepContext<'_>, _worker: &Worker) -> Result<Prepared> {
        let Some(fetched) = ctx.state.try_get(&fetched_key()) else {
            return Ok(Prepared::skip(format!("nothing fetched from {FETCH_WORKER} this round")));
        };
        Ok(Prepared::proceed(json!({
            "taskId": ctx.config.task_id,
            "round": ctx.round(),
            "input": fetched,
        })))
    }

    async fn execute(&self, ctx: &mut StepContext<'_>, worker: &Worker, data: Value) -> Result<StepResult> {
        let response = worker
            .post_json("/process", &data)
            .await
            .with_context(|| format!("posting work to {}", worker.name()))?;
        let no_op = response.is_no_op();
        let result = response.into_step_result();
        if result.success && !no_op {
            ctx.set(&format!("processed.{}", worker.name()), result.data.clone(), Scope::Round)?;
        }
        Ok(result)
    }

    fn validate(&self, data: &Value, result: &StepResult) -> Result<()> {
        let Some(round) = result.data.get("round") else {
            return Ok(());
        };
        if *round != data["round"] {
            bail!("worker processed round {round}, expected {}", data["round"]);
        }
        Ok(())
    }
}
