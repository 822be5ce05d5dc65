//! Periodic expiry sweep.
//!
//! Lazy cleanup already keeps the store correct; the sweep only bounds how
//! long a lapsed session can sit around before anyone probes it. Running it
//! is optional.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::lifecycle::LifecycleCoordinator;

pub struct SweepWorker;

impl SweepWorker {
    /// Spawn the sweep loop on the current runtime. The first tick fires
    /// after one full interval; cancellation stops the loop at the next
    /// await point.
    pub fn spawn(
        coordinator: Arc<LifecycleCoordinator>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // immediate first tick
            debug!(interval_secs = every.as_secs(), "expiry sweep started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("expiry sweep stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = coordinator.sweep_expired().await {
                            warn!(error = %err, "expiry sweep failed");
                        }
                    }
                }
            }
        })
    }
}
