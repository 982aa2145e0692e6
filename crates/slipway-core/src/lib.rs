//! # slipway-core
//!
//! Presence and direction detection for BLE beacons carried through a
//! doorway or gate.
//!
//! Scanners on either side of the boundary report RSSI samples for every
//! beacon they hear. This crate turns that noisy stream into per-beacon
//! presence states and emits a [`StateChangeEvent`] whenever a beacon's state
//! changes, e.g. when a boat is carried into the boathouse.
//!
//! ## Architecture
//!
//! - [`types`] - Samples, sides, directions and timestamps
//! - [`signal`] - Noise-floor clipping, EMA smoothing and rolling buffers
//! - [`calibration`] - Per-scanner RSSI offsets and thresholds
//! - [`crossing`] - Stable threshold crossings and crossing lag
//! - [`engine`] - The detection engine trait and its three implementations
//! - [`store`] - Striped per-beacon presence records
//! - [`staleness`] - Periodic expiry of silent beacons
//! - [`config`] - Layered configuration loading and validation
//! - [`error`] - Unified error types for the crate
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use slipway_core::{build_engine, CalibrationTable, Config, NoBindings};
//!
//! let config = Config::default();
//! let calibration = Arc::new(CalibrationTable::empty(config.default_thresholds()));
//! let engine = build_engine(&config, calibration, Arc::new(NoBindings));
//!
//! let now = chrono::Utc::now();
//! assert!(engine.process_detection("dock-outer", "boat-7", -60, now).is_none());
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod calibration;
pub mod config;
pub mod crossing;
pub mod engine;
pub mod error;
pub mod signal;
pub mod staleness;
pub mod store;
pub mod types;

// Re-export primary types for convenience
pub use crate::calibration::{
    CalibrationEntry, CalibrationError, CalibrationResult, CalibrationTable, ScannerThresholds,
    ThresholdOverride,
};
pub use crate::config::{
    default_config_path, CalibrationConfig, Config, ConfigError, ConfigResult, EngineSection,
    ScannersConfig,
};
pub use crate::crossing::{cross_correlation_lag, first_stable_crossing, peak_time};
pub use crate::engine::{
    build_engine, BindingResolver, DetectionEngine, DualGateConfig, DualGateEngine, EngineKind,
    EntityBinding, GateState, LagClassifierConfig, LagClassifierEngine, LagState, NoBindings,
    PresenceSnapshot, PresenceState, SideBindings, SingleGateConfig, SingleGateEngine,
    SingleGateState, StateChangeEvent, StaticBindings,
};
pub use crate::error::{Result, SlipwayError};
pub use crate::signal::{ConditioningConfig, RollingSeries, SeriesPoint, SignalConditioner};
pub use crate::staleness::StalenessMonitor;
pub use crate::store::StoreConfig;
pub use crate::types::{DetectionSample, Direction, Side, Timestamp};
