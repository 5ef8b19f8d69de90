//! Health and readiness probes for container orchestration.
//!
//! `/healthz` is a liveness probe and only checks that the process answers.
//! `/readyz` additionally pings the session store.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// Liveness probe, always 200.
pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Readiness probe, 503 while the session store is unreachable.
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.sessions.store().ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ready" }))),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "not ready" })),
            )
        }
    }
}
