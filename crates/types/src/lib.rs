//! Shared type definitions for the roundtable harness.
//!
//! Everything in this crate is plain data: the persisted [`TestState`]
//! document, the [`RunnerConfig`] model read from YAML/JSON, and the
//! [`StepResult`]/[`Prepared`] values exchanged by the step protocol. The
//! engine, store, and worker crates all depend on these definitions so the
//! persisted and configured shapes live in exactly one place.

pub mod config;
pub mod state;
pub mod step;

pub use config::{
    CollectionSpec, ConfigValidationError, DatabaseSettings, RunnerConfig, StoreBackend, WorkerSettings, validate_config,
};
pub use state::{CURRENT_ROUND_KEY, LAST_COMPLETED_STEP_KEY, Scope, ScopeParseError, TestState};
pub use step::{Prepared, StepResult, is_truthy};

/// Field stamped onto every fixture document and used to filter store counts.
pub const TASK_ID_FIELD: &str = "taskId";
