use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audit::{AuditLogger, AuditSink};
use crate::catalog::{ProductCatalog, ProductInfo};
use crate::core::Config;
use crate::db::Store;
use crate::lifecycle::{LifecycleCoordinator, SweepWorker};
use crate::utils::{AppError, AppResult, Clock};

/// Shared server state: one `Arc` per service, cheap to clone into every
/// handler.
#[derive(Clone)]
pub struct ServerState {
    pub config: Config,
    pub store: Store,
    pub catalog: Arc<ProductCatalog>,
    pub coordinator: Arc<LifecycleCoordinator>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Clock,
}

impl ServerState {
    /// Initialize everything in dependency order: working directory,
    /// database, catalog, audit worker, coordinator.
    pub async fn initialize(config: &Config) -> AppResult<Self> {
        config
            .ensure_work_dir()
            .map_err(|e| AppError::Internal(format!("cannot create work dir: {e}")))?;

        let store = Store::open(config.database_path())
            .map_err(|e| AppError::Storage(e.to_string()))?;
        info!(path = %config.database_path().display(), "database opened");

        let catalog = ProductCatalog::new();
        load_catalog_file(config, &catalog);

        let audit = AuditLogger::spawn();
        let clock = Clock::system();
        let coordinator = Arc::new(LifecycleCoordinator::new(
            store.clone(),
            catalog.clone(),
            audit.clone(),
            clock.clone(),
            config.lifecycle(),
        ));

        Ok(Self {
            config: config.clone(),
            store,
            catalog,
            coordinator,
            audit,
            clock,
        })
    }

    /// Spawn background tasks. Must be called before `Server::run`.
    pub fn start_background_tasks(&self, shutdown: CancellationToken) {
        if self.config.sweep_interval_secs > 0 {
            SweepWorker::spawn(
                self.coordinator.clone(),
                std::time::Duration::from_secs(self.config.sweep_interval_secs),
                shutdown,
            );
        } else {
            info!("expiry sweep disabled, relying on lazy cleanup only");
        }
    }
}

/// Seed the in-process catalog from `work_dir/catalog.json` if present.
/// A missing file is fine (products can be upserted over the API); a
/// malformed one is logged and skipped.
fn load_catalog_file(config: &Config, catalog: &ProductCatalog) {
    let path = config.catalog_path();
    let raw = match std::fs::read(&path) {
        Ok(raw) => raw,
        Err(_) => return,
    };
    match serde_json::from_slice::<Vec<ProductInfo>>(&raw) {
        Ok(products) => {
            for product in products {
                catalog.upsert(product);
            }
            info!(path = %path.display(), count = catalog.len(), "catalog loaded");
        }
        Err(err) => warn!(path = %path.display(), error = %err, "ignoring malformed catalog file"),
    }
}
