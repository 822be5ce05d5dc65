//! Unified error handling
//!
//! Application-level error type and the JSON response envelope every
//! handler returns:
//!
//! ```json
//! {
//!   "code": "E0000",
//!   "message": "Success",
//!   "data": { ... }
//! }
//! ```
//!
//! # Error code scheme
//!
//! | Prefix | Category | Example |
//! |--------|----------|---------|
//! | E1xxx  | Session errors | E1002 session expired |
//! | E2xxx  | Permission errors | E2001 unauthorized item access |
//! | E0xxx  | Request/business errors | E0003 not found |
//! | E9xxx  | System errors | E9002 storage error |

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::lifecycle::CoreError;

/// Unified API response envelope
#[derive(Debug, Serialize)]
pub struct AppResponse<T> {
    /// Error code (E0000 means success)
    pub code: String,
    /// Message
    pub message: String,
    /// Response data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// Application error enum
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // ========== Session errors (4xx) ==========
    #[error("Session not found")]
    SessionNotFound,

    #[error("Session expired")]
    SessionExpired,

    #[error("Session invalid")]
    SessionInvalid,

    // ========== Permission errors (4xx) ==========
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // ========== Business logic errors (4xx) ==========
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Product unavailable: {0}")]
    ProductUnavailable(String),

    #[error("Table busy: {0}")]
    Busy(String),

    // ========== System errors (5xx) ==========
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Session errors → client must re-scan the QR code
            AppError::SessionNotFound => (
                StatusCode::BAD_REQUEST,
                "E1001",
                "Invalid session. Please scan the table QR code again.".to_string(),
            ),
            AppError::SessionExpired => (
                StatusCode::BAD_REQUEST,
                "E1002",
                "Your session has expired. Please scan the table QR code again.".to_string(),
            ),
            AppError::SessionInvalid => (
                StatusCode::BAD_REQUEST,
                "E1003",
                "Session is not active. Please scan the table QR code again.".to_string(),
            ),

            // Authorization (403) — deliberately generic
            AppError::Unauthorized(_) => {
                (StatusCode::FORBIDDEN, "E2001", "Unauthorized.".to_string())
            }

            // Not found (404)
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "E0003", msg.clone()),

            // Conflict (409)
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "E0004", msg.clone()),

            // Validation (400)
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "E0002", msg.clone()),

            // Product unavailable (422) — names the product
            AppError::ProductUnavailable(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "E0005", msg.clone())
            }

            // Per-table serialization could not be obtained (409, retryable)
            AppError::Busy(msg) => (StatusCode::CONFLICT, "E0006", msg.clone()),

            // Storage errors (500)
            AppError::Storage(msg) => {
                error!(target: "storage", error = %msg, "Storage error occurred");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "E9002",
                    "Storage error".to_string(),
                )
            }

            // Internal errors (500)
            AppError::Internal(msg) => {
                error!(target: "internal", error = %msg, "Internal error occurred");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "E9001",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(AppResponse::<()> {
            code: code.to_string(),
            message,
            data: None,
        });

        (status, body).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::SessionNotFound => AppError::SessionNotFound,
            CoreError::SessionExpired => AppError::SessionExpired,
            CoreError::SessionInvalid => AppError::SessionInvalid,
            CoreError::Unauthorized(msg) => AppError::Unauthorized(msg),
            CoreError::TableNotFound(n) => AppError::NotFound(format!("Table {} not found", n)),
            CoreError::TableInactive(n) => {
                AppError::Validation(format!("Table {} is not active", n))
            }
            CoreError::OrderNotFound(id) => AppError::NotFound(format!("Order {} not found", id)),
            CoreError::ItemNotFound(id) => {
                AppError::NotFound(format!("Cart item {} not found", id))
            }
            CoreError::ProductUnavailable { product_id, name } => AppError::ProductUnavailable(
                format!("Product '{}' ({}) is currently unavailable", name, product_id),
            ),
            CoreError::ConcurrencyConflict(table) => AppError::Busy(format!(
                "Table {} is busy handling another request, please retry",
                table
            )),
            CoreError::TableOccupied(n) => {
                AppError::Conflict(format!("Table {} is occupied", n))
            }
            CoreError::Validation(msg) => AppError::Validation(msg),
            CoreError::Storage(e) => AppError::Storage(e.to_string()),
        }
    }
}

// ========== Helper functions ==========

/// Create a successful response
pub fn ok<T: Serialize>(data: T) -> Json<AppResponse<T>> {
    Json(AppResponse {
        code: "E0000".to_string(),
        message: "Success".to_string(),
        data: Some(data),
    })
}

/// Create a successful response with custom message
pub fn ok_with_message<T: Serialize>(data: T, message: impl Into<String>) -> Json<AppResponse<T>> {
    Json(AppResponse {
        code: "E0000".to_string(),
        message: message.into(),
        data: Some(data),
    })
}
