//! Lifecycle error taxonomy.
//!
//! Everything here is recoverable at the request boundary; none of these
//! abort the process. Invariant repairs (duplicate pending orders, duplicate
//! line items) are deliberately NOT errors — they are logged and audited,
//! and the repaired operation proceeds.

use thiserror::Error;

use crate::db::StorageError;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Token unknown; client must re-scan the QR code.
    #[error("session not found")]
    SessionNotFound,

    /// Session exists but its TTL has elapsed. Discovery of this state has
    /// already triggered lazy cleanup by the time the error surfaces.
    #[error("session expired")]
    SessionExpired,

    /// Session exists but is no longer active.
    #[error("session not active")]
    SessionInvalid,

    /// Operation targets a line item or order not owned by the caller's
    /// table session.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("table {0} not found")]
    TableNotFound(u32),

    #[error("table {0} is not active")]
    TableInactive(u32),

    /// Table still has a non-terminal order (e.g. delete refused).
    #[error("table {0} is occupied")]
    TableOccupied(u32),

    #[error("order {0} not found")]
    OrderNotFound(String),

    #[error("cart item {0} not found")]
    ItemNotFound(String),

    /// Add-to-cart against an inactive or unavailable product.
    #[error("product {product_id} ({name}) is unavailable")]
    ProductUnavailable { product_id: u32, name: String },

    /// The per-table critical section could not be acquired in time;
    /// the caller should retry.
    #[error("table {0} lock timed out")]
    ConcurrencyConflict(u32),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type CoreResult<T> = Result<T, CoreError>;
