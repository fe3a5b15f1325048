//! Round/resume orchestration for roundtable runs.
//!
//! A [`TestRunner`] drives a fixed sequence of [`TestStep`]s across rounds,
//! persisting progress through the [`StateStore`] after every successful step
//! so an interrupted run resumes where it stopped.

pub mod config;
mod error;
pub mod runner;
pub mod state_store;
pub mod step;

pub use config::{ConfigError, load_config_from_path, load_config_with_overrides};
pub use error::{RunnerError, StateError};
pub use runner::{RunOutcome, RunPhase, StoreFactory, TestRunner};
pub use state_store::StateStore;
pub use step::{StepContext, StepHandler, TestStep};
