//! Scoped key/value access over the persisted [`TestState`].
//!
//! Reads resolve the current round's record first, then the global record,
//! then the execution-control fields. Every successful write is flushed to
//! disk before it returns, so a crash can lose at most an in-flight step.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use roundtable_types::{CURRENT_ROUND_KEY, LAST_COMPLETED_STEP_KEY, Scope, TestState};
use roundtable_util::{PathError, insert_path, lookup_path, write_atomic};
use serde_json::Value;
use tracing::{debug, info};

use crate::StateError;

#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: TestState,
}

impl StateStore {
    /// Loads persisted state, or `None` when no state file exists.
    pub fn load(path: &Path) -> Result<Option<Self>, StateError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        let state: TestState = serde_json::from_str(&content)?;
        debug!(
            path = %path.display(),
            round = state.current_round,
            last_completed_step = ?state.last_completed_step,
            "loaded persisted state"
        );
        Ok(Some(Self {
            path: path.to_path_buf(),
            state,
        }))
    }

    /// Starts from `state` and persists it immediately.
    pub fn create(path: &Path, state: TestState) -> Result<Self, StateError> {
        let store = Self {
            path: path.to_path_buf(),
            state,
        };
        store.persist()?;
        Ok(store)
    }

    /// Removes the state file; a missing file is fine.
    pub fn delete(path: &Path) -> Result<(), StateError> {
        match fs::remove_file(path) {
            Ok(()) => {
                info!(path = %path.display(), "deleted persisted state");
                Ok(())
            }
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &TestState {
        &self.state
    }

    pub fn current_round(&self) -> u32 {
        self.state.current_round
    }

    pub fn last_completed_step(&self) -> Option<&str> {
        self.state.last_completed_step.as_deref()
    }

    /// Resolves `key` (dotted paths allowed) across round, global, then execution scope.
    pub fn get(&self, key: &str) -> Result<Value, StateError> {
        if let Some(value) = self.state.current_round_record().and_then(|record| lookup_path(record, key)) {
            return Ok(value.clone());
        }
        if let Some(value) = lookup_path(&self.state.global, key) {
            return Ok(value.clone());
        }
        self.state.execution_value(key).ok_or_else(|| StateError::not_found(key))
    }

    /// Like [`StateStore::get`], mapping "not found" to `None`.
    pub fn try_get(&self, key: &str) -> Option<Value> {
        self.get(key).ok()
    }

    /// Writes `value` at `key` in `scope` and persists the whole state.
    ///
    /// The in-memory state only changes once the write has reached disk.
    pub fn set(&mut self, key: &str, value: Value, scope: Scope) -> Result<(), StateError> {
        let mut next = self.state.clone();
        match scope {
            Scope::Round => {
                insert_path(next.current_round_record_mut(), key, value).map_err(|error| path_error(key, error))?
            }
            Scope::Global => insert_path(&mut next.global, key, value).map_err(|error| path_error(key, error))?,
            Scope::Execution => set_execution(&mut next, key, value)?,
        }
        self.commit(next)
    }

    /// Records `step_name` as the last completed step of the current round.
    pub fn mark_step_completed(&mut self, step_name: &str) -> Result<(), StateError> {
        let mut next = self.state.clone();
        next.record_completion(step_name);
        self.commit(next)
    }

    /// Advances to the next round and clears the completion marker.
    pub fn next_round(&mut self) -> Result<(), StateError> {
        let mut next = self.state.clone();
        next.advance_round();
        self.commit(next)
    }

    /// Replaces the state with `state` once it is persisted.
    pub fn reset(&mut self, state: TestState) -> Result<(), StateError> {
        self.commit(state)
    }

    pub fn persist(&self) -> Result<(), StateError> {
        write_state(&self.path, &self.state)
    }

    fn commit(&mut self, next: TestState) -> Result<(), StateError> {
        write_state(&self.path, &next)?;
        self.state = next;
        Ok(())
    }
}

fn write_state(path: &Path, state: &TestState) -> Result<(), StateError> {
    let content = serde_json::to_vec_pretty(state)?;
    write_atomic(path, &content)?;
    Ok(())
}

fn set_execution(state: &mut TestState, key: &str, value: Value) -> Result<(), StateError> {
    match key {
        CURRENT_ROUND_KEY => {
            let round = value
                .as_u64()
                .and_then(|round| u32::try_from(round).ok())
                .filter(|round| *round >= 1)
                .ok_or_else(|| StateError::invalid_value(key, "expected a positive round number"))?;
            state.current_round = round;
        }
        LAST_COMPLETED_STEP_KEY => {
            state.last_completed_step = match value {
                Value::Null => None,
                Value::String(name) => Some(name),
                _ => return Err(StateError::invalid_value(key, "expected a step name or null")),
            };
        }
        _ => return Err(StateError::InvalidScope { key: key.to_string() }),
    }
    Ok(())
}

fn path_error(key: &str, error: PathError) -> StateError {
    StateError::invalid_value(key, error.to_string())
}
