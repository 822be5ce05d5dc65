//! QR Order Server - table-session and cart lifecycle engine
//!
//! Customers scan a table's QR code, get a short-lived session token, fill
//! a cart and submit it as an order. Sessions carry an absolute TTL; when
//! one lapses, its cart is discarded and its draft order cancelled, lazily
//! on the next touch or proactively by a background sweep.
//!
//! # Module structure
//!
//! ```text
//! src/
//! ├── core/        # config, shared state, HTTP server
//! ├── api/         # routes and handlers
//! ├── lifecycle/   # registry, sessions, cart, coordinator, sweep
//! ├── db/          # redb storage and record types
//! ├── audit/       # audit sink and logging worker
//! ├── catalog.rs   # product lookup seam
//! └── utils/       # errors, logging, clock
//! ```

pub mod api;
pub mod audit;
pub mod catalog;
pub mod core;
pub mod db;
pub mod lifecycle;
pub mod utils;

// Re-export the types embedders need
pub use audit::{AuditAction, AuditEvent, AuditLogger, AuditSink};
pub use catalog::{Catalog, ProductCatalog, ProductInfo};
pub use crate::core::{Config, Server, ServerState};
pub use db::Store;
pub use lifecycle::{LifecycleConfig, LifecycleCoordinator, LifecycleEvent};
pub use utils::{AppError, AppResult, Clock};
pub use utils::logger::{init_logger, init_logger_with_file};

pub fn print_banner() {
    println!(
        r#"
   ____  ____     ____          __
  / __ \/ __ \   / __ \_______/ /__  _____
 / / / / /_/ /  / / / / ___/ __  / _ \/ ___/
/ /_/ / _, _/  / /_/ / /  / /_/ /  __/ /
\___\_\_/ |_|   \____/_/   \__,_/\___/_/
    "#
    );
}

/// Load `.env`, make sure the working directory exists and wire up logging.
/// Call once, before anything else.
pub fn setup_environment(config: &Config) -> std::io::Result<()> {
    config.ensure_work_dir()?;
    let log_dir = config.log_dir();
    init_logger_with_file(Some(&config.log_level), log_dir.to_str());
    Ok(())
}
