//! `${env:NAME}` interpolation for configuration values.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

static ENV_PATTERN: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| Regex::new(r"\$\{env:([A-Za-z_][A-Za-z0-9_]*)\}"));

/// Replaces every `${env:NAME}` placeholder in `value` with the variable's value.
///
/// A referenced variable that is not set is an error.
pub fn interpolate_env(value: &str) -> Result<String, InterpolationError> {
    let env_regex = ENV_PATTERN.as_ref().map_err(|error| InterpolationError::Regex(error.clone()))?;
    if !env_regex.is_match(value) {
        return Ok(value.to_string());
    }

    let mut resolved = Vec::new();
    for cap in env_regex.captures_iter(value) {
        let var_name = cap[1].to_string();
        let env_value = std::env::var(&var_name).map_err(|_| InterpolationError::MissingEnvVar { name: var_name.clone() })?;
        debug!("Interpolated env var: {} -> [REDACTED]", var_name);
        resolved.push((cap[0].to_string(), env_value));
    }

    let mut result = value.to_string();
    for (placeholder, env_value) in resolved {
        result = result.replace(&placeholder, &env_value);
    }
    Ok(result)
}

/// Applies [`interpolate_env`] to every string inside a JSON tree, in place.
pub fn interpolate_json(value: &mut Value) -> Result<(), InterpolationError> {
    match value {
        Value::String(text) => {
            *text = interpolate_env(text)?;
        }
        Value::Array(items) => {
            for item in items {
                interpolate_json(item)?;
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                interpolate_json(item)?;
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
    Ok(())
}

/// Errors that can occur during interpolation.
#[derive(Debug, Error, Clone)]
pub enum InterpolationError {
    #[error("Missing environment variable: {name}")]
    MissingEnvVar { name: String },

    #[error("Regex compilation error: {0}")]
    Regex(#[from] regex::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replaces_placeholders() {
        temp_env::with_var("ROUNDTABLE_TEST_TOKEN", Some("abc"), || {
            let out = interpolate_env("Bearer ${env:ROUNDTABLE_TEST_TOKEN}!").expect("interpolate");
            assert_eq!(out, "Bearer abc!");
        });
    }

    #[test]
    fn missing_variable_is_an_error() {
        temp_env::with_var_unset("ROUNDTABLE_TEST_MISSING", || {
            let err = interpolate_env("${env:ROUNDTABLE_TEST_MISSING}").expect_err("missing var");
            assert!(matches!(err, InterpolationError::MissingEnvVar { ref name } if name == "ROUNDTABLE_TEST_MISSING"));
        });
    }

    #[test]
    fn walks_nested_json() {
        temp_env::with_var("ROUNDTABLE_TEST_PORT", Some("6001"), || {
            let mut value = json!({"workers": {"worker1": {"env": {"PORT": "${env:ROUNDTABLE_TEST_PORT}"}}}, "max_rounds": 2});
            interpolate_json(&mut value).expect("interpolate");
            assert_eq!(value["workers"]["worker1"]["env"]["PORT"], json!("6001"));
            assert_eq!(value["max_rounds"], json!(2));
        });
    }
}
