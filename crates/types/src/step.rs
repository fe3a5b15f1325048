//! Values exchanged by the prepare/execute/validate step protocol.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Output of a step's `prepare` phase.
#[derive(Debug, Clone, PartialEq)]
pub enum Prepared {
    /// Run `execute` with this input.
    Proceed(Value),
    /// Nothing to do this round; `execute` resolves to a successful no-op.
    Skip { reason: Option<String> },
}

impl Prepared {
    pub fn proceed(data: impl Into<Value>) -> Self {
        Prepared::Proceed(data.into())
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Prepared::Skip {
            reason: Some(reason.into()),
        }
    }
}

/// Result of a step's `execute` phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Whether the step succeeded; anything else is a step failure.
    pub success: bool,
    /// Optional human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Arbitrary structured output.
    #[serde(default)]
    pub data: Value,
}

impl StepResult {
    pub fn ok(data: impl Into<Value>) -> Self {
        Self {
            success: true,
            message: None,
            data: data.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: Value::Null,
        }
    }

    /// Successful result that did no work (skipped step or "no eligible work").
    pub fn no_op(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Value::Null,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Interprets an untyped JSON result.
    ///
    /// Success requires a truthy `success` field; an absent field counts as
    /// failure. `message` (or `error`) becomes the message and `data` the
    /// payload, falling back to the whole object.
    pub fn from_json(value: Value) -> Self {
        let Value::Object(map) = value else {
            return Self::failed("step result was not a JSON object");
        };
        let success = map.get("success").is_some_and(is_truthy);
        let message = message_field(&map);
        let data = map.get("data").cloned().unwrap_or_else(|| Value::Object(map.clone()));
        Self { success, message, data }
    }
}

fn message_field(map: &Map<String, Value>) -> Option<String> {
    ["message", "error"]
        .iter()
        .find_map(|key| map.get(*key))
        .map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
}

/// JSON truthiness: `false`, `null`, zero, and empty strings/containers are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
