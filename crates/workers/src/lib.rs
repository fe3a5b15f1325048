//! Worker process supervision.
//!
//! A [`WorkerManager`] owns one [`WorkerProcess`] per configured worker,
//! starts them in declaration order, and tears all of them down on exit.
//! Steps only ever see the read-only [`Worker`] view.

mod error;
mod manager;
mod output;
mod process;
mod worker;

pub use error::WorkerError;
pub use manager::WorkerManager;
pub use output::{OutputStream, TracingSink, WorkerOutputSink};
pub use process::{LaunchSpec, WorkerProcess};
pub use worker::Worker;
