//! Per-scanner signal conditioning.
//!
//! A [`SignalConditioner`] owns the rolling history of one (beacon, side)
//! pair. Every corrected RSSI value is clipped at a noise floor, smoothed
//! with an exponential moving average and appended to a bounded buffer that
//! the crossing primitives and engines read from.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::{secs_between, Timestamp};

/// Default EMA weight given to the newest sample.
pub const DEFAULT_ALPHA: f64 = 0.3;

/// Default clipping floor in dBm.
pub const DEFAULT_FLOOR_DBM: f64 = -100.0;

/// Default number of buffered samples per series.
pub const DEFAULT_CAPACITY: usize = 256;

/// Conditioning parameters shared by every series of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditioningConfig {
    /// Smoothing factor in (0, 1]. Higher values follow the raw signal closer.
    pub alpha: f64,

    /// Values below this floor are clipped up to it.
    pub floor_dbm: f64,

    /// Maximum number of buffered samples; the oldest are evicted first.
    pub capacity: usize,
}

impl Default for ConditioningConfig {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            floor_dbm: DEFAULT_FLOOR_DBM,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// One buffered observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    /// When the sample was observed.
    pub timestamp: Timestamp,

    /// Corrected and floor-clipped value.
    pub value: f64,

    /// EMA value after this sample was applied.
    pub smoothed: f64,
}

/// Bounded, timestamp-ordered buffer of [`SeriesPoint`]s.
///
/// Timestamps never decrease from front to back.
#[derive(Debug, Clone)]
pub struct RollingSeries {
    points: VecDeque<SeriesPoint>,
    capacity: usize,
}

impl RollingSeries {
    /// Create an empty series holding at most `capacity` points.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a point, evicting the oldest one when full.
    ///
    /// Returns `false` (and leaves the series untouched) when the point is
    /// older than the newest buffered point.
    pub fn push(&mut self, point: SeriesPoint) -> bool {
        if self.points.back().is_some_and(|last| point.timestamp < last.timestamp) {
            return false;
        }
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
        true
    }

    /// Number of buffered points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the series holds no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The newest point.
    #[must_use]
    pub fn latest(&self) -> Option<&SeriesPoint> {
        self.points.back()
    }

    /// Iterate points from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &SeriesPoint> + ExactSizeIterator {
        self.points.iter()
    }

    /// Points observed at or after `since`.
    pub fn since(&self, since: Timestamp) -> impl Iterator<Item = &SeriesPoint> {
        self.points.iter().filter(move |p| p.timestamp >= since)
    }

    /// Drop every buffered point.
    pub fn clear(&mut self) {
        self.points.clear();
    }
}

impl Default for RollingSeries {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

/// Clip, smooth and buffer the samples of one (beacon, side) pair.
#[derive(Debug, Clone)]
pub struct SignalConditioner {
    config: ConditioningConfig,
    ema: Option<f64>,
    series: RollingSeries,
}

impl SignalConditioner {
    /// Create a conditioner with the given parameters.
    #[must_use]
    pub fn new(config: ConditioningConfig) -> Self {
        Self {
            config,
            ema: None,
            series: RollingSeries::with_capacity(config.capacity),
        }
    }

    /// Feed one corrected RSSI value and return the updated smoothed value.
    ///
    /// Samples older than the newest buffered sample are dropped and yield
    /// `None`; the EMA is not touched in that case.
    pub fn filter(&mut self, rssi: f64, timestamp: Timestamp) -> Option<f64> {
        if self.series.latest().is_some_and(|last| timestamp < last.timestamp) {
            return None;
        }

        let effective = rssi.max(self.config.floor_dbm);
        let alpha = self.config.alpha;
        let smoothed = self
            .ema
            .map_or(effective, |prev| alpha.mul_add(effective, (1.0 - alpha) * prev));
        self.ema = Some(smoothed);

        self.series.push(SeriesPoint {
            timestamp,
            value: effective,
            smoothed,
        });
        Some(smoothed)
    }

    /// Latest smoothed value, if any sample has been seen.
    #[must_use]
    pub const fn smoothed(&self) -> Option<f64> {
        self.ema
    }

    /// Timestamp of the newest buffered sample.
    #[must_use]
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.series.latest().map(|p| p.timestamp)
    }

    /// Read-only view of the buffered series.
    #[must_use]
    pub const fn series(&self) -> &RollingSeries {
        &self.series
    }

    /// Least-squares slope (dB per second) of the buffered values whose age,
    /// relative to the newest sample, is at most `window_secs`.
    ///
    /// Returns `0.0` with fewer than two points or when all points share a
    /// timestamp.
    #[must_use]
    pub fn slope(&self, window_secs: f64) -> f64 {
        let Some(newest) = self.series.latest().map(|p| p.timestamp) else {
            return 0.0;
        };

        let points: Vec<(f64, f64)> = self
            .series
            .iter()
            .rev()
            .map(|p| (secs_between(newest, p.timestamp), p.value))
            .take_while(|(age, _)| -age <= window_secs)
            .collect();

        if points.len() < 2 {
            return 0.0;
        }

        let n = points.len() as f64;
        let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
        let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

        let (num, den) = points.iter().fold((0.0, 0.0), |(num, den), (x, y)| {
            let dx = x - mean_x;
            (dx.mul_add(y - mean_y, num), dx.mul_add(dx, den))
        });

        if den.abs() < f64::EPSILON {
            0.0
        } else {
            num / den
        }
    }

    /// Forget all history, including the EMA state.
    pub fn reset(&mut self) {
        self.ema = None;
        self.series.clear();
    }
}

impl Default for SignalConditioner {
    fn default() -> Self {
        Self::new(ConditioningConfig::default())
    }
}
