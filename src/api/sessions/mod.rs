//! Session API: customer token validation plus staff administration.

mod handler;

use axum::{
    Router,
    routing::{get, post},
};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/sessions", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/", get(handler::list))
        .route("/validate", get(handler::validate))
        .route("/{token}", get(handler::detail))
        .route("/{token}/deactivate", post(handler::deactivate))
}
