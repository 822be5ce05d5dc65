//! HTTP server startup and shutdown.

use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api;
use crate::core::{Config, ServerState};
use crate::utils::{AppError, AppResult};

pub struct Server {
    config: Config,
    state: Option<ServerState>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: None,
        }
    }

    /// Reuse an existing state (tests, embedded setups).
    pub fn with_state(config: Config, state: ServerState) -> Self {
        Self {
            config,
            state: Some(state),
        }
    }

    pub async fn run(&self) -> AppResult<()> {
        let state = match &self.state {
            Some(state) => state.clone(),
            None => ServerState::initialize(&self.config).await?,
        };

        let shutdown = CancellationToken::new();
        state.start_background_tasks(shutdown.clone());

        let app = api::router()
            .layer(
                tower::ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CorsLayer::permissive()),
            )
            .with_state(state);

        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| AppError::Internal(format!("cannot bind {addr}: {e}")))?;
        info!(%addr, environment = %self.config.environment, "qr-order server listening");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown signal received");
            })
            .await
            .map_err(|e| AppError::Internal(e.to_string()));

        shutdown.cancel();
        result
    }
}
