//! Time source for the lifecycle engine.
//!
//! Session expiry is lazy: nothing sleeps on a timer, every access path
//! re-reads the clock. Tests therefore need to move time forward instead of
//! sleeping, so the engine reads time through a shared [`Clock`] handle
//! whose offset can be advanced.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

/// Shared clock handle. Cloning is cheap; all clones observe the same offset.
#[derive(Debug, Clone)]
pub struct Clock {
    offset: Arc<RwLock<Duration>>,
}

impl Clock {
    /// Clock that follows system time.
    pub fn system() -> Self {
        Self {
            offset: Arc::new(RwLock::new(Duration::zero())),
        }
    }

    /// Current time, system time plus the accumulated offset.
    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + *self.offset.read()
    }

    /// Advance the clock by `delta`. Test support; never called by the
    /// engine itself.
    pub fn advance(&self, delta: Duration) {
        let mut offset = self.offset.write();
        *offset = *offset + delta;
    }
}
