//! Dual-gate hysteresis engine.
//!
//! Two scanners straddle the boundary, one facing out (`outer`) and one
//! facing in (`inner`). Each corrected sample is smoothed and classified:
//!
//! - **strong**: smoothed value at or above the scanner's active threshold
//! - **weak**: at or below `active - hysteresis`, or the side has been
//!   silent for longer than the absence timeout
//!
//! A classification only counts once it wins a majority of at least
//! `confirm_k` votes inside the trailing confirm window.
//!
//! ```text
//!            strong outer            strong inner            strong outer
//!   IDLE ───────────────▶ SEEN_OUTER ───────────▶ SEEN_INNER ───────────▶ ENTERED
//!     ▲                        │                       │                     │
//!     │      weak / timeout    │                       │   inner weak        │
//!     └────────────────────────┴───────────────────────┘◀────────────────────┘
//!                                                        both weak ─▶ EXITED
//! ```
//!
//! Seen-states reached from `ENTERED` settle into `EXITED` instead of
//! `IDLE`. A beacon that receives no sample for `stuck_timeout_secs` is
//! reverted to `IDLE` by its next sample.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    BindingResolver, DetectionEngine, EngineKind, GateState, PresenceSnapshot, PresenceState,
    SideBindings, StateChangeEvent,
};
use crate::calibration::{CalibrationTable, ScannerThresholds};
use crate::signal::{ConditioningConfig, SignalConditioner};
use crate::store::{BeaconPresence, BeaconStore, PresenceRecord, StoreConfig};
use crate::types::{secs_between, Direction, Side, Timestamp};

/// Upper bound on transitions applied for a single sample.
const MAX_CASCADE: usize = 3;

/// Tuning of the dual-gate engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DualGateConfig {
    /// Default strong threshold for scanners without calibrated thresholds.
    pub active_dbm: f64,

    /// Default energy threshold for scanners without calibrated thresholds.
    pub energy_dbm: f64,

    /// Gap between the strong and the weak threshold.
    pub hysteresis_db: f64,

    /// Length of the trailing vote window.
    pub confirm_window_secs: f64,

    /// Votes needed inside the window to confirm a classification.
    pub confirm_k: usize,

    /// A side that has been silent this long counts as weak.
    pub absence_timeout_secs: f64,

    /// How long a seen-state or `EXITED` waits before settling.
    pub state_timeout_secs: f64,

    /// Silence after which a non-idle beacon is reverted to `IDLE`.
    pub stuck_timeout_secs: f64,

    /// Window of the diagnostic slope logged with each transition.
    pub slope_window_secs: f64,
}

impl Default for DualGateConfig {
    fn default() -> Self {
        Self {
            active_dbm: -70.0,
            energy_dbm: -75.0,
            hysteresis_db: 10.0,
            confirm_window_secs: 2.0,
            confirm_k: 3,
            absence_timeout_secs: 5.0,
            state_timeout_secs: 30.0,
            stuck_timeout_secs: 300.0,
            slope_window_secs: 3.0,
        }
    }
}

impl DualGateConfig {
    /// Thresholds used for scanners without a calibration entry.
    #[must_use]
    pub const fn default_thresholds(&self) -> ScannerThresholds {
        ScannerThresholds {
            active_dbm: self.active_dbm,
            energy_dbm: self.energy_dbm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Vote {
    Strong,
    Neutral,
    Weak,
}

#[derive(Debug, Clone)]
struct GateSide {
    conditioner: SignalConditioner,
    votes: VecDeque<(Timestamp, Vote)>,
}

impl GateSide {
    fn new(conditioning: ConditioningConfig) -> Self {
        Self {
            conditioner: SignalConditioner::new(conditioning),
            votes: VecDeque::new(),
        }
    }

    fn record_vote(&mut self, timestamp: Timestamp, vote: Vote, window_secs: f64) {
        self.votes.push_back((timestamp, vote));
        while self
            .votes
            .front()
            .is_some_and(|(t, _)| secs_between(*t, timestamp) > window_secs)
        {
            self.votes.pop_front();
        }
    }

    fn tally(&self, now: Timestamp, window_secs: f64) -> (usize, usize) {
        self.votes
            .iter()
            .filter(|(t, _)| secs_between(*t, now) <= window_secs)
            .fold((0, 0), |(strong, weak), (_, vote)| match vote {
                Vote::Strong => (strong + 1, weak),
                Vote::Weak => (strong, weak + 1),
                Vote::Neutral => (strong, weak),
            })
    }
}

/// Per-beacon state of the dual-gate engine.
#[derive(Debug, Clone)]
pub struct DualGateRecord {
    state: GateState,
    state_since: Option<Timestamp>,
    was_inside: bool,
    outer: GateSide,
    inner: GateSide,
}

impl DualGateRecord {
    fn new(conditioning: ConditioningConfig) -> Self {
        Self {
            state: GateState::Idle,
            state_since: None,
            was_inside: false,
            outer: GateSide::new(conditioning),
            inner: GateSide::new(conditioning),
        }
    }

    fn side(&self, side: Side) -> &GateSide {
        if side == Side::Inner {
            &self.inner
        } else {
            &self.outer
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut GateSide {
        if side == Side::Inner {
            &mut self.inner
        } else {
            &mut self.outer
        }
    }
}

impl PresenceRecord for DualGateRecord {
    fn presence_state(&self) -> PresenceState {
        PresenceState::DualGate(self.state)
    }

    fn is_at_rest(&self) -> bool {
        matches!(self.state, GateState::Idle | GateState::Exited)
    }
}

/// Outer/inner hysteresis engine.
pub struct DualGateEngine {
    config: DualGateConfig,
    conditioning: ConditioningConfig,
    sides: SideBindings,
    calibration: Arc<CalibrationTable>,
    bindings: Arc<dyn BindingResolver>,
    store: BeaconStore<DualGateRecord>,
    retention_secs: f64,
}

impl DualGateEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        config: DualGateConfig,
        conditioning: ConditioningConfig,
        sides: SideBindings,
        calibration: Arc<CalibrationTable>,
        bindings: Arc<dyn BindingResolver>,
        store: StoreConfig,
    ) -> Self {
        Self {
            config,
            conditioning,
            sides,
            calibration,
            bindings,
            store: BeaconStore::new(store.shards),
            retention_secs: store.retention_secs,
        }
    }

    fn classify(&self, smoothed: f64, thresholds: ScannerThresholds) -> Vote {
        if smoothed >= thresholds.active_dbm {
            Vote::Strong
        } else if smoothed <= thresholds.active_dbm - self.config.hysteresis_db {
            Vote::Weak
        } else {
            Vote::Neutral
        }
    }

    fn is_absent(&self, presence: &BeaconPresence<DualGateRecord>, side: Side, now: Timestamp) -> bool {
        presence
            .last_seen(side)
            .map_or(true, |seen| secs_between(seen, now) > self.config.absence_timeout_secs)
    }

    fn confirmed_strong(&self, presence: &BeaconPresence<DualGateRecord>, side: Side, now: Timestamp) -> bool {
        if self.is_absent(presence, side, now) {
            return false;
        }
        let (strong, weak) = presence.record.side(side).tally(now, self.config.confirm_window_secs);
        strong >= self.config.confirm_k && strong > weak
    }

    fn confirmed_weak(&self, presence: &BeaconPresence<DualGateRecord>, side: Side, now: Timestamp) -> bool {
        if self.is_absent(presence, side, now) {
            return true;
        }
        let (strong, weak) = presence.record.side(side).tally(now, self.config.confirm_window_secs);
        weak >= self.config.confirm_k && weak > strong
    }

    /// One step of the transition table, or `None` if the state holds.
    fn next_state(
        &self,
        presence: &BeaconPresence<DualGateRecord>,
        sample_side: Side,
        now: Timestamp,
    ) -> Option<GateState> {
        let record = &presence.record;
        let strong = |side| self.confirmed_strong(presence, side, now);
        let weak = |side| self.confirmed_weak(presence, side, now);
        let timed_out = record
            .state_since
            .is_some_and(|since| secs_between(since, now) > self.config.state_timeout_secs);
        let settled = if record.was_inside {
            GateState::Exited
        } else {
            GateState::Idle
        };
        let other_side = sample_side.opposite().unwrap_or(Side::Outer);

        match record.state {
            GateState::Idle | GateState::Exited => {
                if strong(sample_side) {
                    Some(seen_state(sample_side))
                } else if strong(other_side) {
                    Some(seen_state(other_side))
                } else if record.state == GateState::Exited && timed_out {
                    Some(GateState::Idle)
                } else {
                    None
                }
            }
            GateState::SeenOuter => {
                if strong(Side::Inner) {
                    Some(GateState::SeenInner)
                } else if weak(Side::Outer) || timed_out {
                    Some(settled)
                } else {
                    None
                }
            }
            GateState::SeenInner => {
                if strong(Side::Outer) {
                    Some(GateState::Entered)
                } else if weak(Side::Inner) || timed_out {
                    Some(settled)
                } else {
                    None
                }
            }
            GateState::Entered => {
                let outer_weak = weak(Side::Outer);
                let inner_weak = weak(Side::Inner);
                if outer_weak && inner_weak {
                    Some(GateState::Exited)
                } else if inner_weak {
                    Some(GateState::SeenOuter)
                } else if outer_weak && !strong(Side::Inner) {
                    Some(GateState::SeenInner)
                } else {
                    None
                }
            }
        }
    }

    fn apply(&self, presence: &mut BeaconPresence<DualGateRecord>, next: GateState, now: Timestamp) {
        let record = &mut presence.record;
        match next {
            GateState::Entered => {
                record.was_inside = true;
                presence.entry_timestamp = Some(now);
            }
            GateState::Exited => {
                record.was_inside = false;
                presence.exit_timestamp = Some(now);
            }
            GateState::Idle => record.was_inside = false,
            GateState::SeenOuter | GateState::SeenInner => {}
        }
        record.state = next;
        record.state_since = Some(now);
    }

    fn step(
        &self,
        presence: &mut BeaconPresence<DualGateRecord>,
        previous: Option<BeaconPresence<DualGateRecord>>,
        scanner_id: &str,
        side: Side,
        rssi: i32,
        timestamp: Timestamp,
    ) -> Option<StateChangeEvent> {
        let old_state = previous.as_ref().map_or(presence.record.state, |p| p.record.state);
        if previous.is_some() {
            info!(
                beacon_id = %presence.beacon_id,
                entity_id = ?presence.bound_entity_id,
                "Beacon remapped, presence history reset"
            );
        }

        if presence.is_stale_sample(timestamp) {
            debug!(beacon_id = %presence.beacon_id, scanner_id, "Dropping out-of-order sample");
            return None;
        }

        if presence.record.state != GateState::Idle
            && secs_between(presence.last_update, timestamp) > self.config.stuck_timeout_secs
        {
            info!(
                beacon_id = %presence.beacon_id,
                state = ?presence.record.state,
                silent_secs = secs_between(presence.last_update, timestamp),
                "Reverting stuck beacon to idle"
            );
            presence.record = DualGateRecord::new(self.conditioning);
            presence.record.state_since = Some(timestamp);
        }

        let thresholds = self.calibration.thresholds_for(scanner_id);
        let corrected = self.calibration.correct(scanner_id, rssi);
        let window = self.config.confirm_window_secs;

        let gate_side = presence.record.side_mut(side);
        let Some(smoothed) = gate_side.conditioner.filter(corrected, timestamp) else {
            debug!(beacon_id = %presence.beacon_id, scanner_id, "Dropping out-of-order sample");
            return None;
        };
        let vote = self.classify(smoothed, thresholds);
        gate_side.record_vote(timestamp, vote, window);
        presence.touch(side, timestamp);

        if presence.record.state_since.is_none() {
            presence.record.state_since = Some(timestamp);
        }

        for _ in 0..MAX_CASCADE {
            let Some(next) = self.next_state(presence, side, timestamp) else {
                break;
            };
            self.apply(presence, next, timestamp);
        }

        let new_state = presence.record.state;
        if new_state == old_state {
            return None;
        }

        let direction = match new_state {
            GateState::Entered => Some(Direction::Enter),
            GateState::Exited => Some(Direction::Leave),
            _ => None,
        };
        info!(
            beacon_id = %presence.beacon_id,
            scanner_id,
            from = ?old_state,
            to = ?new_state,
            smoothed,
            "Dual-gate transition"
        );
        debug!(
            beacon_id = %presence.beacon_id,
            outer_slope = presence.record.outer.conditioner.slope(self.config.slope_window_secs),
            inner_slope = presence.record.inner.conditioner.slope(self.config.slope_window_secs),
            "Signal trend at transition"
        );

        Some(StateChangeEvent {
            beacon_id: presence.beacon_id.clone(),
            entity_id: presence.bound_entity_id.clone(),
            scanner_id: Some(scanner_id.to_string()),
            old_state: PresenceState::DualGate(old_state),
            new_state: PresenceState::DualGate(new_state),
            direction,
            confidence: 1.0,
            timestamp,
        })
    }
}

const fn seen_state(side: Side) -> GateState {
    match side {
        Side::Inner => GateState::SeenInner,
        _ => GateState::SeenOuter,
    }
}

impl DetectionEngine for DualGateEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::DualGate
    }

    fn process_detection(
        &self,
        scanner_id: &str,
        beacon_id: &str,
        rssi: i32,
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
            || DualGateRecord::new(self.conditioning),
            |presence, previous| self.step(presence, previous, scanner_id, side, rssi, timestamp),
        )
    }

    fn current_state(&self, beacon_id: &str) -> PresenceState {
        self.store
            .get(beacon_id, |p| p.record.presence_state())
            .unwrap_or(PresenceState::DualGate(GateState::Idle))
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
            debug!(count = evicted.len(), "Evicted idle dual-gate beacons");
        }
        evicted.len()
    }
}
