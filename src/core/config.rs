use std::path::PathBuf;

use crate::lifecycle::LifecycleConfig;

/// Server configuration.
///
/// # Environment variables
///
/// | Variable | Default | Meaning |
/// |----------|---------|---------|
/// | WORK_DIR | /var/lib/qr-order | Working directory (database, logs, catalog) |
/// | HTTP_PORT | 3000 | HTTP API port |
/// | SESSION_TTL_MINUTES | 12 | Absolute session lifetime |
/// | EXPIRY_WARNING_MINUTES | 2 | `expiring_soon` window before the deadline |
/// | TABLE_LOCK_TIMEOUT_MS | 3000 | Per-table lock wait before 409 |
/// | SWEEP_INTERVAL_SECS | 60 | Expiry sweep period, 0 disables the sweep |
/// | ENVIRONMENT | development | development \| staging \| production |
/// | LOG_LEVEL | info | tracing filter when RUST_LOG is unset |
///
/// # Example
///
/// ```ignore
/// WORK_DIR=/data/qr-order HTTP_PORT=8080 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Working directory holding the database, logs and catalog file
    pub work_dir: String,
    /// HTTP API port
    pub http_port: u16,
    /// Absolute session TTL in minutes, counted from creation
    pub session_ttl_minutes: i64,
    /// Minutes before expiry at which validation starts warning
    pub expiry_warning_minutes: i64,
    /// How long an operation waits for a table's lock (milliseconds)
    pub table_lock_timeout_ms: u64,
    /// Expiry sweep period in seconds; 0 disables the background sweep
    pub sweep_interval_secs: u64,
    /// Runtime environment: development | staging | production
    pub environment: String,
    /// Log filter used when RUST_LOG is not set
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/qr-order".into()),
            http_port: std::env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            session_ttl_minutes: std::env::var("SESSION_TTL_MINUTES")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(12),
            expiry_warning_minutes: std::env::var("EXPIRY_WARNING_MINUTES")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(2),
            table_lock_timeout_ms: std::env::var("TABLE_LOCK_TIMEOUT_MS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            sweep_interval_secs: std::env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(60),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
        }
    }

    /// Override the fields tests usually care about.
    pub fn with_overrides(work_dir: impl Into<String>, http_port: u16) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.http_port = http_port;
        config
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("qr-order.redb")
    }

    /// Optional catalog seed file, a JSON array of products.
    pub fn catalog_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("catalog.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("logs")
    }

    pub fn ensure_work_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.work_dir)?;
        std::fs::create_dir_all(self.log_dir())
    }

    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            session_ttl: chrono::Duration::minutes(self.session_ttl_minutes),
            warn_window: chrono::Duration::minutes(self.expiry_warning_minutes),
            lock_timeout: std::time::Duration::from_millis(self.table_lock_timeout_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
