//! Detection engine interface and the concrete engines.
//!
//! Every engine turns a stream of per-scanner RSSI samples into debounced
//! state-change events for each beacon. The engine is chosen once at
//! start-up through [`build_engine`]:
//!
//! - [`DualGateEngine`] - outer/inner hysteresis state machine (default)
//! - [`LagClassifierEngine`] - left/right strength and ordering vote
//! - [`SingleGateEngine`] - degraded single-scanner mode
//!
//! `process_detection` is synchronous and bounded; it never fails. Inputs
//! the engine cannot use (unknown scanners, out-of-order samples, beacons
//! bound to an entity under maintenance) simply produce no event.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationTable;
use crate::config::Config;
use crate::types::{DetectionSample, Direction, Side, Timestamp};

mod binding;
mod dual_gate;
mod lag_classifier;
mod sides;
mod single_gate;

pub use binding::{BindingResolver, EntityBinding, NoBindings, StaticBindings};
pub use dual_gate::{DualGateConfig, DualGateEngine};
pub use lag_classifier::{LagClassifierConfig, LagClassifierEngine};
pub use sides::SideBindings;
pub use single_gate::{SingleGateConfig, SingleGateEngine};

/// The available engine implementations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Outer/inner hysteresis state machine.
    #[default]
    DualGate,
    /// Left/right lag classifier.
    LagClassifier,
    /// Single-scanner heuristic.
    SingleGate,
}

impl EngineKind {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DualGate => "dual_gate",
            Self::LagClassifier => "lag_classifier",
            Self::SingleGate => "single_gate",
        }
    }

    /// The sides a scanner may be bound to for this engine.
    #[must_use]
    pub const fn sides(self) -> &'static [Side] {
        match self {
            Self::DualGate => &[Side::Outer, Side::Inner],
            Self::LagClassifier => &[Side::Left, Side::Right],
            Self::SingleGate => &[Side::Gate],
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States of the dual-gate hysteresis engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    /// Nothing heard recently.
    #[default]
    Idle,
    /// Confirmed strong on the outer scanner.
    SeenOuter,
    /// Confirmed strong on the inner scanner.
    SeenInner,
    /// Crossing committed inwards.
    Entered,
    /// Crossing committed outwards.
    Exited,
}

/// States of the left/right lag classifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LagState {
    /// Waiting for a pass to start.
    #[default]
    Idle,
    /// Collecting samples for the arming window.
    Armed,
    /// Arming window elapsed, waiting for enough samples to vote.
    Deciding,
    /// A direction was voted. Only ever reported in events; the record
    /// moves straight on to `Cooldown`.
    Decided(Direction),
    /// Ignoring reflections of the pass that was just decided.
    Cooldown,
}

/// States of the single-gate heuristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingleGateState {
    /// Not heard recently (decided by the staleness monitor).
    #[default]
    Outside,
    /// Heard at least once since the last staleness flip.
    Inside,
}

/// Engine-tagged presence state of one beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "engine", content = "state", rename_all = "snake_case")]
pub enum PresenceState {
    /// State of a [`DualGateEngine`] beacon.
    DualGate(GateState),
    /// State of a [`LagClassifierEngine`] beacon.
    LagClassifier(LagState),
    /// State of a [`SingleGateEngine`] beacon.
    SingleGate(SingleGateState),
}

impl PresenceState {
    /// The initial state of an engine kind.
    #[must_use]
    pub const fn initial(kind: EngineKind) -> Self {
        match kind {
            EngineKind::DualGate => Self::DualGate(GateState::Idle),
            EngineKind::LagClassifier => Self::LagClassifier(LagState::Idle),
            EngineKind::SingleGate => Self::SingleGate(SingleGateState::Outside),
        }
    }

    /// Whether this is the engine's initial state.
    #[must_use]
    pub fn is_initial(&self) -> bool {
        *self == Self::initial(self.kind())
    }

    /// The engine kind that produces this state.
    #[must_use]
    pub const fn kind(&self) -> EngineKind {
        match self {
            Self::DualGate(_) => EngineKind::DualGate,
            Self::LagClassifier(_) => EngineKind::LagClassifier,
            Self::SingleGate(_) => EngineKind::SingleGate,
        }
    }

    /// Whether the state asserts that the beacon is inside the boundary.
    #[must_use]
    pub const fn is_inside(&self) -> bool {
        matches!(
            self,
            Self::DualGate(GateState::Entered)
                | Self::LagClassifier(LagState::Decided(Direction::Enter))
                | Self::SingleGate(SingleGateState::Inside)
        )
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DualGate(s) => write!(f, "{s:?}"),
            Self::LagClassifier(LagState::Decided(d)) => write!(f, "Decided({d})"),
            Self::LagClassifier(s) => write!(f, "{s:?}"),
            Self::SingleGate(s) => write!(f, "{s:?}"),
        }
    }
}

/// A change of a beacon's presence state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangeEvent {
    /// Beacon whose state changed.
    pub beacon_id: String,

    /// Entity bound to the beacon when the change happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Scanner whose sample triggered the change; `None` for changes
    /// issued by the staleness monitor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanner_id: Option<String>,

    /// State before the sample.
    pub old_state: PresenceState,

    /// State after the sample.
    pub new_state: PresenceState,

    /// Crossing direction, when the change commits one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,

    /// Confidence in `[0, 1]`. Deterministic engines report `1.0`.
    pub confidence: f64,

    /// Timestamp of the triggering sample.
    pub timestamp: Timestamp,
}

/// Read-only view of a beacon's presence record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    /// Beacon identifier.
    pub beacon_id: String,

    /// Current state.
    pub state: PresenceState,

    /// Entity currently bound to the beacon.
    pub bound_entity_id: Option<String>,

    /// Time of the last committed inward crossing.
    pub entry_timestamp: Option<Timestamp>,

    /// Time of the last committed outward crossing.
    pub exit_timestamp: Option<Timestamp>,

    /// Time of the most recent mutation.
    pub last_update: Timestamp,

    /// Most recent sample time per side.
    pub last_seen_by_side: BTreeMap<Side, Timestamp>,
}

/// The contract every detection engine implements.
pub trait DetectionEngine: Send + Sync {
    /// Which algorithm this is.
    fn kind(&self) -> EngineKind;

    /// Feed one decoded observation and return the resulting state change,
    /// if any.
    fn process_detection(
        &self,
        scanner_id: &str,
        beacon_id: &str,
        rssi: i32,
        timestamp: Timestamp,
    ) -> Option<StateChangeEvent>;

    /// [`process_detection`](Self::process_detection) for an owned sample.
    fn process_sample(&self, sample: &DetectionSample) -> Option<StateChangeEvent> {
        self.process_detection(&sample.scanner_id, &sample.beacon_id, sample.rssi, sample.timestamp)
    }

    /// Current state of a beacon; the initial state if it is unknown.
    fn current_state(&self, beacon_id: &str) -> PresenceState;

    /// Full presence record of a beacon, if tracked.
    fn snapshot(&self, beacon_id: &str) -> Option<PresenceSnapshot>;

    /// Identifiers of all tracked beacons.
    fn tracked_beacons(&self) -> Vec<String>;

    /// Evict beacons at rest whose last update is older than the retention
    /// window. Returns the number of evicted beacons.
    fn sweep_idle(&self, now: Timestamp) -> usize;

    /// Flip beacons that have not been heard for `stale_after_secs` to the
    /// outside state. Only the single-gate engine delegates outside-ness to
    /// an external monitor; the other engines return no events.
    fn expire_stale(&self, _now: Timestamp, _stale_after_secs: f64) -> Vec<StateChangeEvent> {
        Vec::new()
    }
}

/// Construct the engine selected by `config.engine.kind`.
#[must_use]
pub fn build_engine(
    config: &Config,
    calibration: Arc<CalibrationTable>,
    bindings: Arc<dyn BindingResolver>,
) -> Arc<dyn DetectionEngine> {
    let scanners = config.scanners.bindings.clone();
    match config.engine.kind {
        EngineKind::DualGate => Arc::new(DualGateEngine::new(
            config.engine.dual_gate.clone(),
            config.conditioning,
            SideBindings::dual_gate(scanners),
            calibration,
            bindings,
            config.store,
        )),
        EngineKind::LagClassifier => Arc::new(LagClassifierEngine::new(
            config.engine.lag_classifier.clone(),
            config.conditioning,
            SideBindings::left_right(scanners),
            calibration,
            bindings,
            config.store,
        )),
        EngineKind::SingleGate => Arc::new(SingleGateEngine::new(
            config.engine.single_gate.clone(),
            SideBindings::single_gate(scanners),
            bindings,
            config.store,
        )),
    }
}
