//! Order API handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};

use crate::api::{operator, table_token};
use crate::core::ServerState;
use crate::db::Order;
use crate::lifecycle::SubmitPayload;
use crate::utils::{AppResponse, AppResult, ok, ok_with_message};

/// POST /api/orders/submit - confirm the session's cart
///
/// Safe to retry: a payload carrying the order id of an already confirmed
/// order gets that order back unchanged.
pub async fn submit(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(payload): Json<SubmitPayload>,
) -> AppResult<Json<AppResponse<Order>>> {
    let token = table_token(&headers)?;
    let order = state.coordinator.submit(token, payload).await?;
    Ok(ok_with_message(
        order,
        "Order submitted. The kitchen has it now.",
    ))
}

/// GET /api/orders/:id - order status and contents
pub async fn get_by_id(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<AppResponse<Order>>> {
    let order = state.coordinator.get_order(&id)?;
    Ok(ok(order))
}

/// POST /api/orders/:id/deliver - staff marks the order delivered
pub async fn deliver(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<AppResponse<Order>>> {
    let operator = operator(&headers);
    let order = state
        .coordinator
        .deliver_order(&id, operator.as_deref())
        .await?;
    Ok(ok(order))
}
