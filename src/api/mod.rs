//! API routing.
//!
//! # Structure
//!
//! - [`health`] - liveness probe
//! - [`tables`] - table management, QR access and staff overrides
//! - [`sessions`] - token validation and session administration
//! - [`cart`] - the session's cart
//! - [`orders`] - submission and fulfilment
//!
//! Customer endpoints identify themselves with the `x-table-token` header;
//! staff endpoints may carry `x-operator` for the audit trail.

pub mod cart;
pub mod health;
pub mod orders;
pub mod sessions;
pub mod tables;

use axum::Router;
use axum::http::HeaderMap;

use crate::core::ServerState;
use crate::utils::AppError;

// Re-export common types for handlers
pub use crate::utils::{AppResponse, AppResult};

pub const TABLE_TOKEN_HEADER: &str = "x-table-token";
pub const OPERATOR_HEADER: &str = "x-operator";

pub fn router() -> Router<ServerState> {
    Router::new()
        .merge(health::router())
        .merge(tables::router())
        .merge(sessions::router())
        .merge(cart::router())
        .merge(orders::router())
}

/// The session token a customer request acts on.
pub(crate) fn table_token(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get(TABLE_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(AppError::SessionNotFound)
}

/// Optional staff identity for the audit trail.
pub(crate) fn operator(headers: &HeaderMap) -> Option<String> {
    headers
        .get(OPERATOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
