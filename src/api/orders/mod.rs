//! Order API: cart submission and fulfilment.

mod handler;

use axum::{
    Router,
    routing::{get, post},
};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/orders", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/submit", post(handler::submit))
        .route("/{id}", get(handler::get_by_id))
        .route("/{id}/deliver", post(handler::deliver))
}
