//! Persisted run progress.
//!
//! [`TestState`] is serialized directly as the state file: string round keys,
//! nested JSON containers for round and global data, and the two execution
//! control fields.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Reserved execution-scope key holding the active round number.
pub const CURRENT_ROUND_KEY: &str = "current_round";

/// Reserved execution-scope key holding the last completed step name.
pub const LAST_COMPLETED_STEP_KEY: &str = "last_completed_step";

/// Where a state write is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Data local to the current round; not carried into the next one.
    Round,
    /// Data shared by every round of the run.
    Global,
    /// The reserved progress fields (`current_round`, `last_completed_step`).
    Execution,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Round => "round",
            Scope::Global => "global",
            Scope::Execution => "execution",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown state scope '{0}' (expected round, global, or execution)")]
pub struct ScopeParseError(pub String);

impl FromStr for Scope {
    type Err = ScopeParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "round" => Ok(Scope::Round),
            "global" => Ok(Scope::Global),
            "execution" => Ok(Scope::Execution),
            other => Err(ScopeParseError(other.to_string())),
        }
    }
}

/// Single source of truth for run progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestState {
    /// Round-scoped records keyed by the round number rendered as a string.
    #[serde(default)]
    pub rounds: BTreeMap<String, Map<String, Value>>,
    /// Merged configuration plus any cross-round data written by steps.
    #[serde(default)]
    pub global: Map<String, Value>,
    /// Active round, starting at 1.
    pub current_round: u32,
    /// Last step that finished successfully in the current round.
    #[serde(default)]
    pub last_completed_step: Option<String>,
}

impl TestState {
    /// Creates the state for round 1 with the given global values.
    pub fn fresh(global: Map<String, Value>) -> Self {
        Self {
            rounds: BTreeMap::new(),
            global,
            current_round: 1,
            last_completed_step: None,
        }
    }

    /// Renders a round number the way it is keyed in [`TestState::rounds`].
    pub fn round_key(round: u32) -> String {
        round.to_string()
    }

    /// Record for the current round, if any step has written one.
    pub fn current_round_record(&self) -> Option<&Map<String, Value>> {
        self.rounds.get(&Self::round_key(self.current_round))
    }

    /// Record for the current round, created on demand.
    pub fn current_round_record_mut(&mut self) -> &mut Map<String, Value> {
        self.rounds.entry(Self::round_key(self.current_round)).or_default()
    }

    /// Records a successful step in the current round.
    pub fn record_completion(&mut self, step_name: impl Into<String>) {
        self.last_completed_step = Some(step_name.into());
    }

    /// Moves to the next round and clears the completion marker.
    pub fn advance_round(&mut self) {
        self.current_round += 1;
        self.last_completed_step = None;
    }

    /// Execution-control fields rendered as JSON, keyed by their reserved names.
    pub fn execution_value(&self, key: &str) -> Option<Value> {
        match key {
            CURRENT_ROUND_KEY => Some(Value::from(self.current_round)),
            LAST_COMPLETED_STEP_KEY => Some(
                self.last_completed_step
                    .as_ref()
                    .map(|name| Value::String(name.clone()))
                    .unwrap_or(Value::Null),
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_string_round_keys() {
        let mut state = TestState::fresh(Map::new());
        state.current_round_record_mut().insert("pr_urls".into(), json!({"worker1": "https://x/pr/1"}));

        let value = serde_json::to_value(&state).expect("serialize state");
        assert_eq!(value["rounds"]["1"]["pr_urls"]["worker1"], "https://x/pr/1");
        assert_eq!(value["current_round"], 1);
        assert_eq!(value["last_completed_step"], Value::Null);
    }

    #[test]
    fn advancing_clears_completion_marker() {
        let mut state = TestState::fresh(Map::new());
        state.record_completion("worker_task");
        state.advance_round();

        assert_eq!(state.current_round, 2);
        assert!(state.last_completed_step.is_none());
        assert!(state.current_round_record().is_none());
    }

    #[test]
    fn parses_scope_names() {
        assert_eq!("Round".parse::<Scope>(), Ok(Scope::Round));
        assert_eq!("global".parse::<Scope>(), Ok(Scope::Global));
        assert_eq!(" execution ".parse::<Scope>(), Ok(Scope::Execution));
        assert!("session".parse::<Scope>().is_err());
    }

    #[test]
    fn deserializes_minimal_document() {
        let state: TestState = serde_json::from_str(r#"{"current_round": 3}"#).expect("minimal state");
        assert_eq!(state.current_round, 3);
        assert!(state.rounds.is_empty());
        assert!(state.last_completed_step.is_none());
    }
}
