//! Cart API. Every route is customer-facing and keyed by `x-table-token`.

mod handler;

use axum::{
    Router,
    routing::{get, post, put},
};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/cart", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/", get(handler::view))
        .route("/count", get(handler::count))
        .route("/items", post(handler::add_item))
        .route(
            "/items/{item_id}",
            put(handler::update_item).delete(handler::remove_item),
        )
}
