//! Periodic background work: idle-record sweeps and staleness checks.
//!
//! Both loops run until the shutdown flag flips to `true` (or its sender is
//! dropped) and then return a running total for the shutdown log.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use slipway_core::{DetectionEngine, StalenessMonitor, StateChangeEvent};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Evict idle beacons every `every` until shutdown. Returns the number evicted.
pub async fn run_sweeper(
    engine: Arc<dyn DetectionEngine>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> usize {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    let mut evicted = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let count = engine.sweep_idle(Utc::now());
                if count > 0 {
                    info!(count, remaining = engine.tracked_beacons().len(), "Swept idle beacons");
                }
                evicted += count;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    debug!(evicted, "Sweeper stopped");
    evicted
}

/// Run `monitor` every `every` until shutdown, forwarding its events.
/// Returns the number of events forwarded.
pub async fn run_staleness(
    monitor: StalenessMonitor,
    every: Duration,
    events: mpsc::Sender<StateChangeEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> usize {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut forwarded = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for event in monitor.tick(Utc::now()) {
                    if events.send(event).await.is_err() {
                        warn!("Event receiver closed, stopping staleness monitor");
                        return forwarded;
                    }
                    forwarded += 1;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    debug!(forwarded, "Staleness monitor stopped");
    forwarded
}

/// Convert a configured interval in seconds into a timer period.
///
/// Non-positive or non-finite values fall back to `fallback`.
#[must_use]
pub fn period(secs: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use slipway_core::{
        build_engine, CalibrationTable, Config, Direction, EngineKind, NoBindings,
    };

    fn engine(kind: EngineKind, retention_secs: f64) -> Arc<dyn DetectionEngine> {
        let mut config = Config::default();
        config.engine.kind = kind;
        config.store.retention_secs = retention_secs;
        build_engine(
            &config,
            Arc::new(CalibrationTable::empty(config.default_thresholds())),
            Arc::new(NoBindings),
        )
    }

    #[test]
    fn test_period_falls_back_on_bad_values() {
        let fallback = Duration::from_secs(1);
        assert_eq!(period(2.5, fallback), Duration::from_millis(2500));
        assert_eq!(period(0.0, fallback), fallback);
        assert_eq!(period(-3.0, fallback), fallback);
        assert_eq!(period(f64::NAN, fallback), fallback);
    }

    #[tokio::test]
    async fn test_staleness_loop_forwards_departures() {
        let engine = engine(EngineKind::SingleGate, 3600.0);
        let long_ago = Utc::now() - chrono::Duration::seconds(600);
        engine.process_detection("dock", "b1", -60, long_ago);

        let monitor = StalenessMonitor::new(Arc::clone(&engine), 60.0);
        let (tx, mut rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_staleness(
            monitor,
            Duration::from_millis(10),
            tx,
            shutdown_rx,
        ));

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.beacon_id, "b1");
        assert_eq!(event.direction, Some(Direction::Leave));

        shutdown_tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_evicts_and_stops() {
        let engine = engine(EngineKind::SingleGate, 1.0);
        let long_ago = Utc::now() - chrono::Duration::seconds(600);
        engine.process_detection("dock", "b1", -60, long_ago);
        engine.expire_stale(long_ago + chrono::Duration::seconds(61), 60.0);
        assert_eq!(engine.tracked_beacons().len(), 1);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_sweeper(
            Arc::clone(&engine),
            Duration::from_millis(10),
            shutdown_rx,
        ));

        tokio_test::assert_ok!(
            tokio::time::timeout(Duration::from_secs(2), async {
                while !engine.tracked_beacons().is_empty() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
        );

        drop(shutdown_tx);
        assert_eq!(handle.await.unwrap(), 1);
    }
}
