//! Dining table API: staff CRUD, customer QR access and staff overrides.

mod handler;

use axum::{
    Router,
    routing::{get, post},
};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/tables", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/", get(handler::list).post(handler::create))
        .route(
            "/{number}",
            get(handler::get_by_number)
                .put(handler::update)
                .delete(handler::delete),
        )
        .route("/{number}/access", post(handler::access))
        .route("/{number}/free", post(handler::free))
        .route("/free-all", post(handler::free_all))
}
