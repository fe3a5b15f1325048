//! Backing document store for roundtable runs.
//!
//! The orchestrator only ever counts, deletes, inserts, and lists
//! collections, so the [`DocumentStore`] contract is limited to those four
//! operations. [`FixtureReconciler`] builds the pre-run consistency check and
//! reseed on top of it.

mod document;
mod error;
mod memory;
mod reconcile;
mod sqlite;

use std::path::Path;
use std::sync::Arc;

use roundtable_types::{DatabaseSettings, StoreBackend};

pub use document::{DocumentStore, Filter, filter_matches, task_filter};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use reconcile::{FixtureReconciler, PostSeedHook};
pub use sqlite::SqliteStore;

/// Opens the database named in `settings`, placing file-backed stores under `directory`.
pub fn open_database(settings: &DatabaseSettings, directory: &Path) -> Result<Arc<dyn DocumentStore>, StoreError> {
    match settings.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Sqlite => Ok(Arc::new(SqliteStore::open(directory, &settings.name)?)),
    }
}
