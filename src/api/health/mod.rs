//! Health check endpoint.

use axum::{Json, Router, extract::State, routing::get};
use serde_json::json;

use crate::core::ServerState;
use crate::utils::{AppResponse, ok};

pub fn router() -> Router<ServerState> {
    Router::new().route("/api/health", get(health))
}

async fn health(State(state): State<ServerState>) -> Json<AppResponse<serde_json::Value>> {
    ok(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "now": state.clock.now(),
    }))
}
