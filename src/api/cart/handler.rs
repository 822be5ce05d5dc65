//! Cart API handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use serde::Deserialize;
use serde_json::json;

use crate::api::table_token;
use crate::core::ServerState;
use crate::db::CustomerRef;
use crate::lifecycle::CartSummary;
use crate::utils::{AppResponse, AppResult, ok};

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: u32,
    /// Desired total quantity for this product, not an increment.
    pub quantity: u32,
    pub notes: Option<String>,
    /// Resolved customer identity; anonymous when omitted.
    pub customer: Option<CustomerRef>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    /// New quantity; zero removes the item.
    pub quantity: Option<u32>,
    pub notes: Option<String>,
}

/// GET /api/cart - current cart for the session's table
pub async fn view(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> AppResult<Json<AppResponse<CartSummary>>> {
    let token = table_token(&headers)?;
    let cart = state.coordinator.view_cart(token).await?;
    Ok(ok(cart))
}

/// GET /api/cart/count - total item quantity (badge counter)
pub async fn count(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> AppResult<Json<AppResponse<serde_json::Value>>> {
    let token = table_token(&headers)?;
    let count = state.coordinator.cart_count(token).await?;
    Ok(ok(json!({ "count": count })))
}

/// POST /api/cart/items - set a product's quantity in the cart
pub async fn add_item(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(payload): Json<AddItemRequest>,
) -> AppResult<Json<AppResponse<CartSummary>>> {
    let token = table_token(&headers)?;
    let customer = payload.customer.unwrap_or_else(CustomerRef::anonymous);
    let cart = state
        .coordinator
        .add_item(
            token,
            customer,
            payload.product_id,
            payload.quantity,
            payload.notes,
        )
        .await?;
    Ok(ok(cart))
}

/// PUT /api/cart/items/:item_id - change quantity or notes
pub async fn update_item(
    State(state): State<ServerState>,
    Path(item_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<UpdateItemRequest>,
) -> AppResult<Json<AppResponse<CartSummary>>> {
    let token = table_token(&headers)?;
    let cart = state
        .coordinator
        .update_item(token, &item_id, payload.quantity, payload.notes)
        .await?;
    Ok(ok(cart))
}

/// DELETE /api/cart/items/:item_id - remove one line
pub async fn remove_item(
    State(state): State<ServerState>,
    Path(item_id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<AppResponse<CartSummary>>> {
    let token = table_token(&headers)?;
    let cart = state.coordinator.remove_item(token, &item_id).await?;
    Ok(ok(cart))
}
