//! Shared types used across the detection engines.
//!
//! Samples arrive from the (external) ingestion layer already decoded; this
//! module only describes their shape and the vocabulary of sides and
//! directions the engines reason about.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp type used throughout the engines.
pub type Timestamp = DateTime<Utc>;

/// A single decoded radio observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionSample {
    /// Identifier of the scanner that heard the beacon.
    pub scanner_id: String,

    /// Opaque beacon identifier.
    pub beacon_id: String,

    /// Received signal strength in dBm.
    pub rssi: i32,

    /// When the scanner observed the advertisement.
    pub timestamp: Timestamp,
}

/// Logical position of a scanner at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Scanner facing the outside of the boundary (dual-gate).
    Outer,
    /// Scanner facing the inside of the boundary (dual-gate).
    Inner,
    /// Left scanner of a side-by-side pair (lag classifier).
    Left,
    /// Right scanner of a side-by-side pair (lag classifier).
    Right,
    /// The only scanner of a single-gate deployment.
    Gate,
}

impl Side {
    /// Normalized lowercase name, also used as the calibration key for
    /// side-keyed engines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Outer => "outer",
            Self::Inner => "inner",
            Self::Left => "left",
            Self::Right => "right",
            Self::Gate => "gate",
        }
    }

    /// The opposite side of a pair. `Gate` has no opposite.
    #[must_use]
    pub const fn opposite(self) -> Option<Self> {
        match self {
            Self::Outer => Some(Self::Inner),
            Self::Inner => Some(Self::Outer),
            Self::Left => Some(Self::Right),
            Self::Right => Some(Self::Left),
            Self::Gate => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "outer" => Ok(Self::Outer),
            "inner" => Ok(Self::Inner),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "gate" => Ok(Self::Gate),
            other => Err(format!("unknown side '{other}'")),
        }
    }
}

/// Direction of a committed boundary crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// The beacon moved from outside to inside.
    Enter,
    /// The beacon moved from inside to outside.
    Leave,
}

impl Direction {
    /// The reverse direction.
    #[must_use]
    pub const fn reversed(self) -> Self {
        match self {
            Self::Enter => Self::Leave,
            Self::Leave => Self::Enter,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enter => f.write_str("enter"),
            Self::Leave => f.write_str("leave"),
        }
    }
}

/// Seconds elapsed from `earlier` to `later`, negative if `later` precedes it.
#[must_use]
pub fn secs_between(earlier: Timestamp, later: Timestamp) -> f64 {
    let delta = later - earlier;
    delta
        .num_microseconds()
        .map_or_else(|| delta.num_milliseconds() as f64 / 1_000.0, |us| us as f64 / 1_000_000.0)
}
