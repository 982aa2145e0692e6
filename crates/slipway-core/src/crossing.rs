//! Stateless crossing primitives over a [`RollingSeries`].
//!
//! All primitives read the clipped, corrected sample values (not the EMA),
//! so that a dwell requirement measures the signal itself rather than the
//! filter's lag.

use crate::signal::RollingSeries;
use crate::types::{secs_between, Timestamp};

/// Timestamp of the earliest sample at or above `threshold` that starts a
/// run of consecutive at-or-above samples spanning at least `dwell_secs`.
///
/// A run that is cut short by a lower sample, or that simply has not been
/// observed for `dwell_secs` yet, does not count.
#[must_use]
pub fn first_stable_crossing(
    series: &RollingSeries,
    threshold: f64,
    dwell_secs: f64,
) -> Option<Timestamp> {
    let mut run_start: Option<Timestamp> = None;

    for point in series.iter() {
        if point.value < threshold {
            run_start = None;
            continue;
        }
        let start = *run_start.get_or_insert(point.timestamp);
        if secs_between(start, point.timestamp) >= dwell_secs {
            return Some(start);
        }
    }

    None
}

/// Lag in seconds between the stable energy crossings of two series,
/// `t_b - t_a`.
///
/// A positive lag means `a` crossed first. Returns `None` when either
/// series has no stable crossing or the lag exceeds `max_lag_secs`.
#[must_use]
pub fn cross_correlation_lag(
    a: &RollingSeries,
    b: &RollingSeries,
    energy_threshold: f64,
    dwell_secs: f64,
    max_lag_secs: f64,
) -> Option<f64> {
    cross_correlation_lag_with(a, energy_threshold, b, energy_threshold, dwell_secs, max_lag_secs)
}

/// [`cross_correlation_lag`] with a separate energy threshold per series,
/// for scanners calibrated independently.
#[must_use]
pub fn cross_correlation_lag_with(
    a: &RollingSeries,
    threshold_a: f64,
    b: &RollingSeries,
    threshold_b: f64,
    dwell_secs: f64,
    max_lag_secs: f64,
) -> Option<f64> {
    let t_a = first_stable_crossing(a, threshold_a, dwell_secs)?;
    let t_b = first_stable_crossing(b, threshold_b, dwell_secs)?;
    let lag = secs_between(t_a, t_b);
    (lag.abs() <= max_lag_secs).then_some(lag)
}

/// Timestamp of the strongest buffered sample; ties resolve to the earliest.
#[must_use]
pub fn peak_time(series: &RollingSeries) -> Option<Timestamp> {
    series
        .iter()
        .fold(None::<(f64, Timestamp)>, |best, p| match best {
            Some((value, _)) if value >= p.value => best,
            _ => Some((p.value, p.timestamp)),
        })
        .map(|(_, ts)| ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SeriesPoint;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn t(secs: f64) -> Timestamp {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
            + Duration::milliseconds((secs * 1000.0) as i64)
    }

    fn series(points: &[(f64, f64)]) -> RollingSeries {
        let mut s = RollingSeries::with_capacity(256);
        for &(secs, value) in points {
            s.push(SeriesPoint {
                timestamp: t(secs),
                value,
                smoothed: value,
            });
        }
        s
    }

    #[test]
    fn test_stable_crossing_found_after_dwell() {
        let s = series(&[(0.0, -90.0), (1.0, -65.0), (1.5, -64.0), (2.0, -66.0), (2.5, -60.0)]);
        assert_eq!(first_stable_crossing(&s, -70.0, 1.0), Some(t(1.0)));
    }

    #[test]
    fn test_short_spike_is_not_a_crossing() {
        let s = series(&[(0.0, -90.0), (1.0, -50.0), (1.3, -90.0), (2.0, -91.0), (3.0, -88.0)]);
        assert_eq!(first_stable_crossing(&s, -70.0, 1.0), None);
    }

    #[test]
    fn test_unfinished_run_is_not_a_crossing() {
        let s = series(&[(0.0, -90.0), (1.0, -60.0), (1.5, -60.0)]);
        assert_eq!(first_stable_crossing(&s, -70.0, 1.0), None);
    }

    #[test]
    fn test_crossing_restarts_after_dip() {
        let s = series(&[(0.0, -60.0), (0.5, -80.0), (1.0, -60.0), (1.5, -60.0), (2.0, -60.0)]);
        assert_eq!(first_stable_crossing(&s, -70.0, 1.0), Some(t(1.0)));
    }

    #[test]
    fn test_zero_dwell_accepts_single_sample() {
        let s = series(&[(0.0, -90.0), (1.0, -70.0)]);
        assert_eq!(first_stable_crossing(&s, -70.0, 0.0), Some(t(1.0)));
    }

    #[test]
    fn test_lag_sign_tracks_which_side_crossed_first() {
        let a = series(&[(0.0, -60.0), (1.0, -60.0), (2.0, -60.0)]);
        let b = series(&[(0.0, -90.0), (1.0, -60.0), (2.0, -60.0), (3.0, -60.0)]);
        assert_relative_eq!(cross_correlation_lag(&a, &b, -70.0, 1.0, 5.0).unwrap(), 1.0);
        assert_relative_eq!(cross_correlation_lag(&b, &a, -70.0, 1.0, 5.0).unwrap(), -1.0);
    }

    #[test]
    fn test_lag_beyond_bound_is_rejected() {
        let a = series(&[(0.0, -60.0), (1.0, -60.0)]);
        let b = series(&[(10.0, -60.0), (11.0, -60.0)]);
        assert!(cross_correlation_lag(&a, &b, -70.0, 1.0, 5.0).is_none());
    }

    #[test]
    fn test_lag_requires_both_crossings() {
        let a = series(&[(0.0, -60.0), (1.0, -60.0)]);
        let b = series(&[(0.0, -90.0), (1.0, -90.0)]);
        assert!(cross_correlation_lag(&a, &b, -70.0, 1.0, 5.0).is_none());
    }

    #[test]
    fn test_peak_time_prefers_earliest_tie() {
        let s = series(&[(0.0, -70.0), (1.0, -55.0), (2.0, -60.0), (3.0, -55.0)]);
        assert_eq!(peak_time(&s), Some(t(1.0)));
        assert_eq!(peak_time(&RollingSeries::default()), None);
    }
}
