//! Single-gate presence engine.
//!
//! One scanner (or a group of scanners sharing the `gate` side) watches the
//! whole area. Any sample marks the beacon `INSIDE`; silence for longer than
//! the staleness threshold marks it `OUTSIDE` again, driven by
//! [`crate::staleness::StalenessMonitor`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    BindingResolver, DetectionEngine, EngineKind, PresenceSnapshot, PresenceState, SideBindings,
    SingleGateState, StateChangeEvent,
};
use crate::store::{BeaconPresence, BeaconStore, PresenceRecord, StoreConfig};
use crate::types::{secs_between, Direction, Side, Timestamp};

/// Tuning of the single-gate engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SingleGateConfig {
    /// Silence after which an `INSIDE` beacon is considered gone.
    pub stale_after_secs: f64,
}

impl Default for SingleGateConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 60.0,
        }
    }
}

/// Per-beacon state of the single-gate engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleGateRecord {
    state: SingleGateState,
}

impl PresenceRecord for SingleGateRecord {
    fn presence_state(&self) -> PresenceState {
        PresenceState::SingleGate(self.state)
    }

    fn is_at_rest(&self) -> bool {
        self.state == SingleGateState::Outside
    }
}

/// Seen-means-inside engine.
pub struct SingleGateEngine {
    config: SingleGateConfig,
    sides: SideBindings,
    bindings: Arc<dyn BindingResolver>,
    store: BeaconStore<SingleGateRecord>,
    retention_secs: f64,
}

impl SingleGateEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        config: SingleGateConfig,
        sides: SideBindings,
        bindings: Arc<dyn BindingResolver>,
        store: StoreConfig,
    ) -> Self {
        Self {
            config,
            sides,
            bindings,
            store: BeaconStore::new(store.shards),
            retention_secs: store.retention_secs,
        }
    }

    /// Staleness threshold configured for this engine.
    #[must_use]
    pub const fn stale_after_secs(&self) -> f64 {
        self.config.stale_after_secs
    }

    fn step(
        presence: &mut BeaconPresence<SingleGateRecord>,
        previous: Option<&BeaconPresence<SingleGateRecord>>,
        scanner_id: &str,
        side: Side,
        timestamp: Timestamp,
    ) -> Option<StateChangeEvent> {
        let old_state = previous.map_or(presence.record.state, |p| p.record.state);
        if presence.is_stale_sample(timestamp) {
            debug!(beacon_id = %presence.beacon_id, scanner_id, "Dropping out-of-order sample");
            return None;
        }

        presence.touch(side, timestamp);
        if presence.record.state == SingleGateState::Outside {
            presence.record.state = SingleGateState::Inside;
            presence.entry_timestamp = Some(timestamp);
        }

        if old_state == SingleGateState::Inside && presence.record.state == SingleGateState::Inside {
            return None;
        }

        info!(
            beacon_id = %presence.beacon_id,
            entity_id = ?presence.bound_entity_id,
            scanner_id,
            "Beacon arrived"
        );
        Some(StateChangeEvent {
            beacon_id: presence.beacon_id.clone(),
            entity_id: presence.bound_entity_id.clone(),
            scanner_id: Some(scanner_id.to_string()),
            old_state: PresenceState::SingleGate(old_state),
            new_state: PresenceState::SingleGate(SingleGateState::Inside),
            direction: Some(Direction::Enter),
            confidence: 1.0,
            timestamp,
        })
    }
}

impl DetectionEngine for SingleGateEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::SingleGate
    }

    fn process_detection(
        &self,
        scanner_id: &str,
        beacon_id: &str,
        _rssi: i32,
        timestamp: Timestamp,
    ) -> Option<StateChangeEvent> {
        let Some(side) = self.sides.resolve(scanner_id) else {
            debug!(scanner_id, beacon_id, "Ignoring sample from unbound scanner");
            return None;
        };

        let binding = self.bindings.resolved_binding(beacon_id);
        if binding.as_ref().is_some_and(|b| b.under_maintenance) {
            debug!(beacon_id, "Ignoring sample for entity under maintenance");
            return None;
        }
        let entity_id = binding.map(|b| b.entity_id);

        self.store.update(
            beacon_id,
            entity_id.as_deref(),
            timestamp,
            SingleGateRecord::default,
            |presence, previous| {
                if previous.is_some() {
                    info!(
                        beacon_id,
                        entity_id = ?presence.bound_entity_id,
                        "Beacon remapped, presence history reset"
                    );
                }
                Self::step(presence, previous.as_ref(), scanner_id, side, timestamp)
            },
        )
    }

    fn current_state(&self, beacon_id: &str) -> PresenceState {
        self.store
            .get(beacon_id, |p| p.record.presence_state())
            .unwrap_or(PresenceState::SingleGate(SingleGateState::Outside))
    }

    fn snapshot(&self, beacon_id: &str) -> Option<PresenceSnapshot> {
        self.store.get(beacon_id, BeaconPresence::snapshot)
    }

    fn tracked_beacons(&self) -> Vec<String> {
        self.store.beacon_ids()
    }

    fn sweep_idle(&self, now: Timestamp) -> usize {
        let evicted = self.store.sweep(now, self.retention_secs);
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "Evicted idle single-gate beacons");
        }
        evicted.len()
    }

    fn expire_stale(&self, now: Timestamp, stale_after_secs: f64) -> Vec<StateChangeEvent> {
        let mut events = Vec::new();
        self.store.for_each_mut(|presence| {
            if presence.record.state != SingleGateState::Inside
                || secs_between(presence.last_update, now) <= stale_after_secs
            {
                return;
            }
            presence.record.state = SingleGateState::Outside;
            presence.exit_timestamp = Some(now);
            presence.last_update = now;
            info!(
                beacon_id = %presence.beacon_id,
                entity_id = ?presence.bound_entity_id,
                "Beacon went stale"
            );
            events.push(StateChangeEvent {
                beacon_id: presence.beacon_id.clone(),
                entity_id: presence.bound_entity_id.clone(),
                scanner_id: None,
                old_state: PresenceState::SingleGate(SingleGateState::Inside),
                new_state: PresenceState::SingleGate(SingleGateState::Outside),
                direction: Some(Direction::Leave),
                confidence: 1.0,
                timestamp: now,
            });
        });
        events
    }
}
