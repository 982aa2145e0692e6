//! Periodic staleness checks.
//!
//! Engines that cannot observe a departure directly (the single-gate engine
//! only ever sees arrivals) rely on an external clock to declare silent
//! beacons gone. [`StalenessMonitor::tick`] is that clock; the daemon calls it
//! on a fixed interval.

use std::sync::Arc;

use tracing::debug;

use crate::engine::{DetectionEngine, StateChangeEvent};
use crate::types::Timestamp;

/// Drives [`DetectionEngine::expire_stale`] for one engine.
pub struct StalenessMonitor {
    engine: Arc<dyn DetectionEngine>,
    stale_after_secs: f64,
}

impl StalenessMonitor {
    /// Create a monitor declaring beacons stale after `stale_after_secs` of silence.
    #[must_use]
    pub fn new(engine: Arc<dyn DetectionEngine>, stale_after_secs: f64) -> Self {
        Self {
            engine,
            stale_after_secs,
        }
    }

    /// Staleness threshold in seconds.
    #[must_use]
    pub const fn stale_after_secs(&self) -> f64 {
        self.stale_after_secs
    }

    /// Expire every beacon silent for longer than the threshold at `now`.
    pub fn tick(&self, now: Timestamp) -> Vec<StateChangeEvent> {
        let events = self.engine.expire_stale(now, self.stale_after_secs);
        if !events.is_empty() {
            debug!(count = events.len(), engine = %self.engine.kind(), "Expired stale beacons");
        }
        events
    }
}
