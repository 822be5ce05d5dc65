//! Session API handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use serde::Serialize;
use serde_json::json;

use crate::api::{operator, table_token};
use crate::core::ServerState;
use crate::db::TableSession;
use crate::lifecycle::{CartSummary, SessionFilter, TokenValidation};
use crate::utils::{AppResponse, AppResult, ok};

/// GET /api/sessions/validate - is this token still good?
///
/// Always 200 with a verdict; an invalid token is an answer, not an error.
/// Checking a lapsed token triggers its cleanup.
pub async fn validate(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> AppResult<Json<AppResponse<TokenValidation>>> {
    let token = table_token(&headers)?;
    let validation = state.coordinator.validate_token(token).await?;
    Ok(ok(validation))
}

/// GET /api/sessions?table=5&active_only=true - staff listing
pub async fn list(
    State(state): State<ServerState>,
    Query(filter): Query<SessionFilter>,
) -> AppResult<Json<AppResponse<Vec<TableSession>>>> {
    let sessions = state.coordinator.list_sessions(&filter)?;
    Ok(ok(sessions))
}

#[derive(Debug, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: TableSession,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cart: Option<CartSummary>,
}

/// GET /api/sessions/:token - one session and its table's cart.
/// Read-only: staff can inspect a lapsed session without cleaning it up.
pub async fn detail(
    State(state): State<ServerState>,
    Path(token): Path<String>,
) -> AppResult<Json<AppResponse<SessionDetail>>> {
    let (session, cart) = state.coordinator.session_detail(&token)?;
    Ok(ok(SessionDetail { session, cart }))
}

/// POST /api/sessions/:token/deactivate - staff override
pub async fn deactivate(
    State(state): State<ServerState>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<AppResponse<serde_json::Value>>> {
    let operator = operator(&headers);
    state
        .coordinator
        .deactivate_session(&token, operator.as_deref())
        .await?;
    Ok(ok(json!({ "token": token, "deactivated": true })))
}
