//! JSON-over-HTTP calls against a worker's local endpoint.

use reqwest::{Client, StatusCode};
use roundtable_types::StepResult;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::parser::{JsonParseError, parse_response_body, parse_response_json_strict, truncate_response_preview};

/// Status a worker answers with when it has no eligible work this round.
pub const NO_ELIGIBLE_WORK_STATUS: u16 = 409;

/// Raw outcome of a worker call: the status code and the decoded body.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerResponse {
    pub status: u16,
    pub body: Value,
}

impl WorkerResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// HTTP 409: the worker had nothing to do.
    pub fn is_no_op(&self) -> bool {
        self.status == NO_ELIGIBLE_WORK_STATUS
    }

    /// Maps the response onto a step result.
    ///
    /// 409 is a successful no-op and any other non-2xx status is a failure.
    /// A 2xx body decides success through its `success` flag when present,
    /// then through `status == "success"`, and is otherwise successful.
    pub fn into_step_result(self) -> StepResult {
        if self.is_no_op() {
            let mut result = StepResult::no_op("no eligible work this round");
            result.data = self.body;
            return result;
        }

        if !self.is_success() {
            let detail = match &self.body {
                Value::Null => String::new(),
                Value::String(text) => truncate_response_preview(text, 200),
                other => truncate_response_preview(&other.to_string(), 200),
            };
            let mut result = StepResult::failed(format!("worker responded with HTTP {}: {}", self.status, detail));
            result.data = self.body;
            return result;
        }

        if let Value::Object(map) = &self.body {
            if map.contains_key("success") {
                return StepResult::from_json(self.body);
            }
            if let Some(status) = map.get("status") {
                let success = status.as_str() == Some("success");
                let mut result = StepResult::from_json(self.body.clone());
                result.success = success;
                result.data = self.body;
                return result;
            }
        }
        StepResult::ok(self.body)
    }
}

/// Errors raised while talking to a worker.
#[derive(Debug, Error)]
pub enum WorkerHttpError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error(transparent)]
    Parse(#[from] JsonParseError),
}

/// Thin client bound to one worker's base URL.
#[derive(Debug, Clone)]
pub struct WorkerHttpClient {
    base_url: String,
    client: Client,
}

impl WorkerHttpClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Joins `path` onto the base URL, tolerating a missing or doubled slash.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    pub async fn get(&self, path: &str) -> Result<WorkerResponse, WorkerHttpError> {
        let url = self.endpoint(path);
        debug!(url = %url, "GET worker endpoint");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| WorkerHttpError::Request { url: url.clone(), source })?;
        Self::decode(url, response).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<WorkerResponse, WorkerHttpError> {
        let url = self.endpoint(path);
        debug!(url = %url, "POST worker endpoint");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|source| WorkerHttpError::Request { url: url.clone(), source })?;
        Self::decode(url, response).await
    }

    async fn decode(url: String, response: reqwest::Response) -> Result<WorkerResponse, WorkerHttpError> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| WorkerHttpError::Request { url, source })?;
        // Error pages are often HTML; only successful bodies must be JSON.
        let body = if status.is_success() && status != StatusCode::NO_CONTENT {
            parse_response_json_strict(&text, Some(status))?
        } else {
            parse_response_body(&text)
        };
        Ok(WorkerResponse::new(status.as_u16(), body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode as AxumStatus, routing::get, routing::post};
    use serde_json::json;

    #[test]
    fn conflict_is_a_successful_no_op() {
        let result = WorkerResponse::new(409, json!({"message": "nothing to audit"})).into_step_result();
        assert!(result.success);
        assert_eq!(result.data, json!({"message": "nothing to audit"}));
    }

    #[test]
    fn other_error_statuses_fail() {
        let result = WorkerResponse::new(500, json!("boom")).into_step_result();
        assert!(!result.success);
        assert!(result.message.unwrap_or_default().contains("HTTP 500"));
    }

    #[test]
    fn success_flag_in_body_wins() {
        let result = WorkerResponse::new(200, json!({"success": false, "message": "bad"})).into_step_result();
        assert!(!result.success);
        assert_eq!(result.message.as_deref(), Some("bad"));
    }

    #[test]
    fn status_field_is_consulted_without_success_flag() {
        assert!(WorkerResponse::new(200, json!({"status": "success"})).into_step_result().success);
        assert!(!WorkerResponse::new(200, json!({"status": "pending"})).into_step_result().success);
    }

    #[test]
    fn plain_ok_is_success() {
        let result = WorkerResponse::new(200, json!([1, 2])).into_step_result();
        assert!(result.success);
        assert_eq!(result.data, json!([1, 2]));
    }

    #[test]
    fn endpoint_joins_slashes() {
        let client = WorkerHttpClient::new("http://localhost:5001/");
        assert_eq!(client.endpoint("/process"), "http://localhost:5001/process");
        assert_eq!(client.endpoint("process"), "http://localhost:5001/process");
    }

    #[tokio::test]
    async fn round_trips_against_a_live_server() {
        let app = Router::new()
            .route("/test-endpoint", get(|| async { Json(json!({"status": "success"})) }))
            .route(
                "/process",
                post(|Json(body): Json<Value>| async move { (AxumStatus::CONFLICT, Json(json!({"echo": body}))) }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let client = WorkerHttpClient::new(format!("http://{addr}"));
        let fetched = client.get("/test-endpoint").await.expect("get");
        assert_eq!(fetched.status, 200);
        assert!(fetched.into_step_result().success);

        let processed = client.post_json("/process", &json!({"n": 1})).await.expect("post");
        assert!(processed.is_no_op());
        assert_eq!(processed.body, json!({"echo": {"n": 1}}));
    }
}
