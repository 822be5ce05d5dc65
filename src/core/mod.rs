//! Server core: configuration, shared state and the HTTP server itself.

pub mod config;
pub mod server;
pub mod state;

pub use config::Config;
pub use server::Server;
pub use state::ServerState;
