//! Minimal worker service for trying `roundtable run` locally.
//!
//! Listens on `127.0.0.1:$PORT` and tags every response with `$WORKER_ID`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 5001;

struct WorkerState {
    worker_id: String,
    requests: AtomicU64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let port = match std::env::var("PORT") {
        Ok(raw) => raw.parse::<u16>().with_context(|| format!("invalid PORT '{raw}'"))?,
        Err(_) => DEFAULT_PORT,
    };
    let worker_id = std::env::var("WORKER_ID").unwrap_or_else(|_| format!("worker-{port}"));

    let state = Arc::new(WorkerState {
        worker_id,
        requests: AtomicU64::new(0),
    });
    let router = router(state.clone());

    let address = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("binding {address}"))?;
    info!(worker = %state.worker_id, %address, "demo worker listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("demo worker server failed")
}

fn router(state: Arc<WorkerState>) -> Router {
    Router::new()
        .route("/test-endpoint", get(test_endpoint))
        .route("/process", post(process))
        .with_state(state)
}

async fn test_endpoint(State(state): State<Arc<WorkerState>>) -> Json<Value> {
    let served = state.requests.fetch_add(1, Ordering::SeqCst) + 1;
    info!(worker = %state.worker_id, served, "served test data");
    Json(json!({
        "status": "success",
        "data": {
            "worker_id": state.worker_id,
            "items": ["alpha", "beta", "gamma"],
            "served": served,
        },
    }))
}

/// Echoes the payload back; a request without input is answered with 409.
async fn process(State(state): State<Arc<WorkerState>>, Json(payload): Json<Value>) -> (StatusCode, Json<Value>) {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let Some(input) = payload.get("input").filter(|input| !input.is_null()) else {
        return (
            StatusCode::CONFLICT,
            Json(json!({"success": false, "message": "no input to process"})),
        );
    };

    let items = input.get("items").and_then(Value::as_array).map_or(0, Vec::len);
    info!(worker = %state.worker_id, items, "processed input");
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": format!("processed {items} items"),
            "data": {
                "worker_id": state.worker_id,
                "round": payload.get("round").cloned().unwrap_or(Value::Null),
                "items": items,
            },
        })),
    )
}
