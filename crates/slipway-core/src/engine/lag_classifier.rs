//! Left/right lag-classifier engine.
//!
//! Two scanners are mounted side by side across the passage. A pass is
//! classified by which scanner hears the beacon louder while it is being
//! armed, falling back to which one crossed the energy threshold first when
//! the strengths are too close to call.
//!
//! ```text
//! IDLE ──sample──▶ ARMED ──arming window──▶ DECIDING ──vote──▶ DECIDED ──▶ COOLDOWN ──▶ IDLE
//!                                              │
//!                                              └── no vote before the decision timeout ──▶ IDLE
//! ```
//!
//! Exactly one directional event is emitted per pass; `COOLDOWN` swallows
//! the reflections that follow it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    BindingResolver, DetectionEngine, EngineKind, LagState, PresenceSnapshot, PresenceState,
    SideBindings, StateChangeEvent,
};
use crate::calibration::{CalibrationTable, ScannerThresholds};
use crate::crossing::{cross_correlation_lag_with, peak_time};
use crate::signal::{ConditioningConfig, SignalConditioner};
use crate::store::{BeaconPresence, BeaconStore, PresenceRecord, StoreConfig};
use crate::types::{secs_between, Direction, Side, Timestamp};

/// Tuning of the lag classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LagClassifierConfig {
    /// Default strong threshold for sides without calibrated thresholds.
    pub active_dbm: f64,

    /// Default energy threshold for sides without calibrated thresholds.
    pub energy_dbm: f64,

    /// How long samples are collected before voting.
    pub arming_window_secs: f64,

    /// Extra time allowed in `DECIDING` before giving up on the pass.
    pub decision_timeout_secs: f64,

    /// How long samples are ignored after a decision.
    pub cooldown_secs: f64,

    /// Samples needed on each side before a vote is attempted.
    pub min_samples_per_side: usize,

    /// Minimum difference of average strength for a strength vote.
    pub min_margin_db: f64,

    /// Dwell for the energy crossings used as a tie-break.
    pub dwell_secs: f64,

    /// Largest crossing lag accepted as a tie-break.
    pub max_lag_secs: f64,

    /// Confidence reported with every directional event.
    pub confidence: f64,

    /// Direction reported when the left side dominates.
    pub left_dominant: Direction,

    /// Silence after which an armed or deciding beacon starts over.
    pub stale_reset_secs: f64,
}

impl Default for LagClassifierConfig {
    fn default() -> Self {
        Self {
            active_dbm: -70.0,
            energy_dbm: -75.0,
            arming_window_secs: 2.0,
            decision_timeout_secs: 5.0,
            cooldown_secs: 10.0,
            min_samples_per_side: 2,
            min_margin_db: 3.0,
            dwell_secs: 0.5,
            max_lag_secs: 3.0,
            confidence: 0.8,
            left_dominant: Direction::Enter,
            stale_reset_secs: 30.0,
        }
    }
}

impl LagClassifierConfig {
    /// Thresholds used for sides without a calibration entry.
    #[must_use]
    pub const fn default_thresholds(&self) -> ScannerThresholds {
        ScannerThresholds {
            active_dbm: self.active_dbm,
            energy_dbm: self.energy_dbm,
        }
    }

    /// Longest time a pass can keep a record out of `IDLE`.
    #[must_use]
    pub fn longest_timer_secs(&self) -> f64 {
        self.cooldown_secs
            .max(self.stale_reset_secs)
            .max(self.arming_window_secs + self.decision_timeout_secs)
    }

    const fn direction_for(&self, dominant: Side) -> Direction {
        match dominant {
            Side::Left => self.left_dominant,
            _ => self.left_dominant.reversed(),
        }
    }
}

/// Per-beacon state of the lag classifier.
#[derive(Debug, Clone)]
pub struct LagRecord {
    state: LagState,
    armed_at: Option<Timestamp>,
    cooldown_since: Option<Timestamp>,
    left: SignalConditioner,
    right: SignalConditioner,
}

impl LagRecord {
    fn new(conditioning: ConditioningConfig) -> Self {
        Self {
            state: LagState::Idle,
            armed_at: None,
            cooldown_since: None,
            left: SignalConditioner::new(conditioning),
            right: SignalConditioner::new(conditioning),
        }
    }

    fn conditioner_mut(&mut self, side: Side) -> &mut SignalConditioner {
        if side == Side::Left {
            &mut self.left
        } else {
            &mut self.right
        }
    }

    fn to_idle(&mut self) {
        self.state = LagState::Idle;
        self.armed_at = None;
        self.cooldown_since = None;
        self.left.reset();
        self.right.reset();
    }
}

impl PresenceRecord for LagRecord {
    fn presence_state(&self) -> PresenceState {
        PresenceState::LagClassifier(self.state)
    }

    // Every state but IDLE is bounded by a timer shorter than the retention
    // window, and a record untouched that long is reset by its next sample.
    fn is_at_rest(&self) -> bool {
        true
    }
}

/// Left/right strength-and-ordering classifier.
pub struct LagClassifierEngine {
    config: LagClassifierConfig,
    conditioning: ConditioningConfig,
    sides: SideBindings,
    calibration: Arc<CalibrationTable>,
    bindings: Arc<dyn BindingResolver>,
    store: BeaconStore<LagRecord>,
    retention_secs: f64,
}

impl LagClassifierEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        config: LagClassifierConfig,
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

    /// Vote a direction from the samples gathered since arming.
    fn vote(&self, record: &LagRecord, armed_at: Timestamp) -> Option<Direction> {
        let average = |c: &SignalConditioner| {
            let (sum, n) = c
                .series()
                .since(armed_at)
                .fold((0.0, 0_usize), |(sum, n), p| (sum + p.smoothed, n + 1));
            (n >= self.config.min_samples_per_side).then(|| sum / n as f64)
        };

        let left_avg = average(&record.left)?;
        let right_avg = average(&record.right)?;
        let margin = left_avg - right_avg;

        let dominant = if margin.abs() >= self.config.min_margin_db {
            if margin > 0.0 {
                Side::Left
            } else {
                Side::Right
            }
        } else {
            let left_energy = self.calibration.thresholds_for(Side::Left.as_str()).energy_dbm;
            let right_energy = self.calibration.thresholds_for(Side::Right.as_str()).energy_dbm;
            let lag = cross_correlation_lag_with(
                record.left.series(),
                left_energy,
                record.right.series(),
                right_energy,
                self.config.dwell_secs,
                self.config.max_lag_secs,
            )?;
            if lag > 0.0 {
                Side::Left
            } else if lag < 0.0 {
                Side::Right
            } else {
                return None;
            }
        };

        debug!(
            left_avg,
            right_avg,
            ?dominant,
            left_peak = ?peak_time(record.left.series()),
            right_peak = ?peak_time(record.right.series()),
            "Lag classifier vote"
        );
        Some(self.config.direction_for(dominant))
    }

    fn step(
        &self,
        presence: &mut BeaconPresence<LagRecord>,
        previous: Option<BeaconPresence<LagRecord>>,
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

        match presence.record.state {
            LagState::Cooldown => {
                let since = presence.record.cooldown_since.unwrap_or(timestamp);
                if secs_between(since, timestamp) < self.config.cooldown_secs {
                    return None;
                }
                presence.record.to_idle();
            }
            LagState::Armed | LagState::Deciding
                if secs_between(presence.last_update, timestamp) > self.config.stale_reset_secs =>
            {
                info!(beacon_id = %presence.beacon_id, "Abandoning stale pass");
                presence.record.to_idle();
            }
            _ => {}
        }

        let corrected = self.calibration.correct(side.as_str(), rssi);
        if presence
            .record
            .conditioner_mut(side)
            .filter(corrected, timestamp)
            .is_none()
        {
            debug!(beacon_id = %presence.beacon_id, scanner_id, "Dropping out-of-order sample");
            return None;
        }
        presence.touch(side, timestamp);

        let record = &mut presence.record;
        if record.state == LagState::Idle {
            record.state = LagState::Armed;
            record.armed_at = Some(timestamp);
        }
        let armed_at = record.armed_at.unwrap_or(timestamp);
        let elapsed = secs_between(armed_at, timestamp);

        if record.state == LagState::Armed && elapsed >= self.config.arming_window_secs {
            record.state = LagState::Deciding;
        }

        let mut direction = None;
        if record.state == LagState::Deciding {
            match self.vote(record, armed_at) {
                Some(voted) => direction = Some(voted),
                None if elapsed > self.config.arming_window_secs + self.config.decision_timeout_secs => {
                    debug!(beacon_id = %presence.beacon_id, "No vote before decision timeout, dropping pass");
                    presence.record.to_idle();
                    return None;
                }
                None => {}
            }
        }

        let new_state = match direction {
            Some(voted) => {
                record.state = LagState::Cooldown;
                record.cooldown_since = Some(timestamp);
                match voted {
                    Direction::Enter => presence.entry_timestamp = Some(timestamp),
                    Direction::Leave => presence.exit_timestamp = Some(timestamp),
                }
                info!(
                    beacon_id = %presence.beacon_id,
                    direction = %voted,
                    "Lag classifier decided"
                );
                LagState::Decided(voted)
            }
            None => record.state,
        };

        if new_state == old_state {
            return None;
        }

        Some(StateChangeEvent {
            beacon_id: presence.beacon_id.clone(),
            entity_id: presence.bound_entity_id.clone(),
            scanner_id: Some(scanner_id.to_string()),
            old_state: PresenceState::LagClassifier(old_state),
            new_state: PresenceState::LagClassifier(new_state),
            direction,
            confidence: if direction.is_some() {
                self.config.confidence
            } else {
                0.0
            },
            timestamp,
        })
    }
}

impl DetectionEngine for LagClassifierEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::LagClassifier
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
            || LagRecord::new(self.conditioning),
            |presence, previous| self.step(presence, previous, scanner_id, side, rssi, timestamp),
        )
    }

    fn current_state(&self, beacon_id: &str) -> PresenceState {
        self.store
            .get(beacon_id, |p| p.record.presence_state())
            .unwrap_or(PresenceState::LagClassifier(LagState::Idle))
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
            debug!(count = evicted.len(), "Evicted idle lag-classifier beacons");
        }
        evicted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationEntry;
    use crate::engine::{NoBindings, StaticBindings};
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashMap;

    fn t(secs: f64) -> Timestamp {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
            + Duration::milliseconds((secs * 1000.0) as i64)
    }

    fn engine_with(config: LagClassifierConfig, calibration: CalibrationTable) -> LagClassifierEngine {
        engine_bound(config, calibration, Arc::new(NoBindings))
    }

    fn engine_bound(
        config: LagClassifierConfig,
        calibration: CalibrationTable,
        bindings: Arc<dyn BindingResolver>,
    ) -> LagClassifierEngine {
        LagClassifierEngine::new(
            config,
            ConditioningConfig::default(),
            SideBindings::left_right(HashMap::new()),
            Arc::new(calibration),
            bindings,
            StoreConfig::default(),
        )
    }

    fn bound_engine(bindings: Arc<StaticBindings>) -> LagClassifierEngine {
        let config = LagClassifierConfig::default();
        let calibration = CalibrationTable::empty(config.default_thresholds());
        engine_bound(config, calibration, bindings)
    }

    /// `(armed_at, left samples, right samples)` of `b1`.
    fn history(engine: &LagClassifierEngine) -> (Option<Timestamp>, usize, usize) {
        engine
            .store
            .get("b1", |p| {
                (
                    p.record.armed_at,
                    p.record.left.series().len(),
                    p.record.right.series().len(),
                )
            })
            .unwrap()
    }

    fn engine() -> LagClassifierEngine {
        let config = LagClassifierConfig::default();
        let calibration = CalibrationTable::empty(config.default_thresholds());
        engine_with(config, calibration)
    }

    /// Interleave left and right samples every 0.25 s from `start` to `end`.
    fn pass(
        engine: &LagClassifierEngine,
        left: i32,
        right: i32,
        start: f64,
        end: f64,
    ) -> Vec<StateChangeEvent> {
        let mut events = Vec::new();
        let mut secs = start;
        while secs <= end {
            events.extend(engine.process_detection("ramp-left", "b1", left, t(secs)));
            events.extend(engine.process_detection("ramp-right", "b1", right, t(secs + 0.1)));
            secs += 0.25;
        }
        events
    }

    fn directional(events: &[StateChangeEvent]) -> Vec<&StateChangeEvent> {
        events.iter().filter(|e| e.direction.is_some()).collect()
    }

    #[test]
    fn test_left_dominant_pass_yields_one_event() {
        let e = engine();
        let events = pass(&e, -55, -65, 0.0, 3.0);

        let decided = directional(&events);
        assert_eq!(decided.len(), 1);
        assert_eq!(
            decided[0].new_state,
            PresenceState::LagClassifier(LagState::Decided(Direction::Enter))
        );
        assert_eq!(decided[0].direction, Some(Direction::Enter));
        assert!((decided[0].confidence - 0.8).abs() < f64::EPSILON);
        assert_eq!(e.current_state("b1"), PresenceState::LagClassifier(LagState::Cooldown));

        // Reflections during cooldown are swallowed.
        assert!(pass(&e, -50, -80, 3.5, 8.0).is_empty());
        assert_eq!(e.current_state("b1"), PresenceState::LagClassifier(LagState::Cooldown));
    }

    #[test]
    fn test_right_dominant_pass_reports_reverse_direction() {
        let e = engine();
        let events = pass(&e, -68, -52, 0.0, 3.0);
        let decided = directional(&events);
        assert_eq!(decided.len(), 1);
        assert_eq!(decided[0].direction, Some(Direction::Leave));
        assert_eq!(e.snapshot("b1").unwrap().exit_timestamp, Some(decided[0].timestamp));
    }

    #[test]
    fn test_first_sample_arms() {
        let e = engine();
        let event = e.process_detection("ramp-left", "b1", -60, t(0.0)).unwrap();
        assert_eq!(event.old_state, PresenceState::LagClassifier(LagState::Idle));
        assert_eq!(event.new_state, PresenceState::LagClassifier(LagState::Armed));
        assert!(event.direction.is_none());
    }

    #[test]
    fn test_one_sided_pass_falls_back_to_idle_silently() {
        let e = engine();
        let mut events = Vec::new();
        let mut secs = 0.0;
        while secs <= 10.0 {
            events.extend(e.process_detection("ramp-left", "b1", -55, t(secs)));
            secs += 0.5;
        }
        assert!(directional(&events).is_empty());
        assert!(events
            .iter()
            .all(|ev| ev.new_state != PresenceState::LagClassifier(LagState::Idle)));
        let states: Vec<PresenceState> = events.iter().map(|ev| ev.new_state).collect();
        assert!(states.contains(&PresenceState::LagClassifier(LagState::Deciding)));
    }

    #[test]
    fn test_cooldown_expires_and_rearms() {
        let e = engine();
        pass(&e, -55, -65, 0.0, 3.0);
        let event = e.process_detection("ramp-left", "b1", -60, t(20.0)).unwrap();
        assert_eq!(event.old_state, PresenceState::LagClassifier(LagState::Cooldown));
        assert_eq!(event.new_state, PresenceState::LagClassifier(LagState::Armed));
    }

    #[test]
    fn test_close_strengths_use_crossing_order() {
        let config = LagClassifierConfig {
            min_margin_db: 50.0,
            ..LagClassifierConfig::default()
        };
        let calibration = CalibrationTable::empty(config.default_thresholds());
        let e = engine_with(config, calibration);
        let mut events = Vec::new();
        // Left rises above the energy threshold a second before right. With
        // an unreachable margin only the crossing order can decide.
        for i in 0..=12 {
            let secs = f64::from(i) * 0.25;
            let left = if secs >= 0.5 { -60 } else { -90 };
            let right = if secs >= 1.5 { -55 } else { -90 };
            events.extend(e.process_detection("ramp-left", "b1", left, t(secs)));
            events.extend(e.process_detection("ramp-right", "b1", right, t(secs + 0.05)));
        }
        let decided = directional(&events);
        assert_eq!(decided.len(), 1);
        assert_eq!(decided[0].direction, Some(Direction::Enter));
    }

    #[test]
    fn test_calibration_is_keyed_by_side_name() {
        let config = LagClassifierConfig::default();
        let mut entries = HashMap::new();
        // Left reads 15 dB hot; after correction the right side dominates.
        entries.insert(
            "left".to_string(),
            CalibrationEntry {
                rssi_offset_db: 15.0,
                ..CalibrationEntry::default()
            },
        );
        let calibration = CalibrationTable::new(entries, config.default_thresholds());
        let e = engine_with(config, calibration);

        let events = pass(&e, -55, -62, 0.0, 3.0);
        let decided = directional(&events);
        assert_eq!(decided.len(), 1);
        assert_eq!(decided[0].direction, Some(Direction::Leave));
    }

    #[test]
    fn test_late_sample_from_other_side_is_dropped() {
        let e = engine();
        assert!(e.process_detection("ramp-left", "b1", -55, t(100.0)).is_some());

        // The right scanner's clock lags far behind the left one.
        assert!(e.process_detection("ramp-right", "b1", -55, t(0.0)).is_none());
        assert_eq!(e.snapshot("b1").unwrap().last_update, t(100.0));
        assert_eq!(history(&e), (Some(t(100.0)), 1, 0));

        assert!(e.process_detection("ramp-left", "b1", -55, t(100.25)).is_none());
        assert_eq!(e.current_state("b1"), PresenceState::LagClassifier(LagState::Armed));
        assert_eq!(history(&e), (Some(t(100.0)), 2, 0));
    }

    #[test]
    fn test_maintenance_suppresses_everything() {
        let bindings = Arc::new(StaticBindings::default());
        bindings.bind("b1", "boat-1");
        bindings.set_maintenance("b1", true);
        let e = bound_engine(bindings.clone());

        assert!(pass(&e, -55, -65, 0.0, 3.0).is_empty());
        assert!(e.snapshot("b1").is_none());

        bindings.set_maintenance("b1", false);
        let event = e.process_detection("ramp-left", "b1", -55, t(3.5)).unwrap();
        assert_eq!(event.new_state, PresenceState::LagClassifier(LagState::Armed));
        assert_eq!(event.entity_id.as_deref(), Some("boat-1"));
    }

    #[test]
    fn test_remapping_resets_pass() {
        let bindings = Arc::new(StaticBindings::default());
        bindings.bind("b1", "boat-1");
        let e = bound_engine(bindings.clone());

        // Left-dominant samples, still inside the arming window.
        pass(&e, -55, -65, 0.0, 1.5);
        assert_eq!(e.current_state("b1"), PresenceState::LagClassifier(LagState::Armed));
        assert_eq!(history(&e), (Some(t(0.0)), 7, 7));

        bindings.bind("b1", "boat-2");
        assert!(e.process_detection("ramp-right", "b1", -52, t(1.75)).is_none());
        assert_eq!(history(&e), (Some(t(1.75)), 0, 1));
        let snapshot = e.snapshot("b1").unwrap();
        assert_eq!(snapshot.bound_entity_id.as_deref(), Some("boat-2"));
        assert!(snapshot.entry_timestamp.is_none());

        // Only the right-dominant samples after the remap take part in the vote.
        let events = pass(&e, -68, -52, 2.0, 4.5);
        let decided = directional(&events);
        assert_eq!(decided.len(), 1);
        assert_eq!(decided[0].direction, Some(Direction::Leave));
        assert_eq!(decided[0].entity_id.as_deref(), Some("boat-2"));
        assert!(decided[0].timestamp >= t(3.75));
    }

    #[test]
    fn test_unknown_scanner_is_ignored() {
        let e = engine();
        assert!(e.process_detection("ramp-top", "b1", -40, t(0.0)).is_none());
        assert!(e.tracked_beacons().is_empty());
    }
}
