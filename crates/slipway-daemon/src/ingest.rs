//! Line-oriented detection input.
//!
//! Each line is one JSON object:
//!
//! ```json
//! {"scanner_id": "dock-outer", "beacon_id": "ac:23:3f:a0:11:02", "rssi": -61, "timestamp": "2025-06-01T12:00:00.250Z"}
//! ```
//!
//! `timestamp` is optional and defaults to the time the line was read.

use chrono::Utc;
use serde::Deserialize;
use slipway_core::{DetectionEngine, DetectionSample, SlipwayError, StateChangeEvent, Timestamp};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One decoded input line.
#[derive(Debug, Clone, Deserialize)]
struct DetectionRecord {
    scanner_id: String,
    beacon_id: String,
    rssi: i32,
    #[serde(default)]
    timestamp: Option<Timestamp>,
}

/// Counters reported when the input ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Lines read, including blank and malformed ones.
    pub lines: u64,
    /// Samples handed to the engine.
    pub samples: u64,
    /// Events produced by the engine.
    pub events: u64,
    /// Lines that could not be decoded.
    pub malformed: u64,
}

/// Decode one input line. Blank lines yield `Ok(None)`.
///
/// # Errors
///
/// Returns [`SlipwayError::MalformedDetection`] if the line is not a valid
/// detection record.
pub fn parse_line(line: &str, received_at: Timestamp) -> slipway_core::Result<Option<DetectionSample>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let record: DetectionRecord = serde_json::from_str(line)?;
    if record.scanner_id.trim().is_empty() {
        return Err(SlipwayError::MalformedDetection("scanner_id is empty".into()));
    }
    if record.beacon_id.trim().is_empty() {
        return Err(SlipwayError::MalformedDetection("beacon_id is empty".into()));
    }

    Ok(Some(DetectionSample {
        scanner_id: record.scanner_id,
        beacon_id: record.beacon_id,
        rssi: record.rssi,
        timestamp: record.timestamp.unwrap_or(received_at),
    }))
}

/// Feed every line of `reader` through `engine`, forwarding events to `events`.
///
/// Returns when the input ends or the event receiver is gone.
///
/// # Errors
///
/// Returns an error if reading from `reader` fails.
pub async fn run<R>(
    reader: R,
    engine: &dyn DetectionEngine,
    events: &mpsc::Sender<StateChangeEvent>,
) -> std::io::Result<IngestStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = IngestStats::default();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        stats.lines += 1;

        let sample = match parse_line(&line, Utc::now()) {
            Ok(Some(sample)) => sample,
            Ok(None) => continue,
            Err(e) => {
                stats.malformed += 1;
                warn!(line = stats.lines, error = %e, "Skipping malformed detection");
                continue;
            }
        };

        stats.samples += 1;
        let Some(event) = engine.process_sample(&sample) else {
            continue;
        };
        stats.events += 1;

        if events.send(event).await.is_err() {
            debug!("Event receiver closed, stopping ingestion");
            break;
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use slipway_core::{
        build_engine, CalibrationTable, Config, EngineKind, NoBindings, PresenceState,
        SingleGateState,
    };
    use std::sync::Arc;
    use tokio::io::BufReader;

    fn received() -> Timestamp {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn single_gate() -> Arc<dyn DetectionEngine> {
        let mut config = Config::default();
        config.engine.kind = EngineKind::SingleGate;
        build_engine(
            &config,
            Arc::new(CalibrationTable::empty(config.default_thresholds())),
            Arc::new(NoBindings),
        )
    }

    #[test]
    fn test_parse_line_with_timestamp() {
        let sample = parse_line(
            r#"{"scanner_id":"dock-outer","beacon_id":"b1","rssi":-61,"timestamp":"2025-06-01T12:00:05Z"}"#,
            received(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(sample.scanner_id, "dock-outer");
        assert_eq!(sample.rssi, -61);
        assert_eq!(sample.timestamp, received() + chrono::Duration::seconds(5));
    }

    #[test]
    fn test_parse_line_defaults_timestamp() {
        let sample = parse_line(r#"{"scanner_id":"a","beacon_id":"b1","rssi":-70}"#, received())
            .unwrap()
            .unwrap();
        assert_eq!(sample.timestamp, received());
    }

    #[test]
    fn test_parse_line_skips_blank() {
        assert!(parse_line("   ", received()).unwrap().is_none());
    }

    #[test]
    fn test_parse_line_rejects_garbage() {
        let err = parse_line("not json", received()).unwrap_err();
        assert_eq!(err.error_code(), "MALFORMED_DETECTION");

        let err = parse_line(r#"{"scanner_id":"","beacon_id":"b1","rssi":-70}"#, received())
            .unwrap_err();
        assert!(err.is_recoverable());

        assert!(parse_line(r#"{"scanner_id":"a","beacon_id":"b1","rssi":"loud"}"#, received()).is_err());
    }

    #[tokio::test]
    async fn test_run_forwards_events_and_counts_lines() {
        let input = tokio_test::io::Builder::new()
            .read(b"{\"scanner_id\":\"dock\",\"beacon_id\":\"b1\",\"rssi\":-60}\n")
            .read(b"garbage\n\n")
            .read(b"{\"scanner_id\":\"dock\",\"beacon_id\":\"b1\",\"rssi\":-62}\n")
            .read(b"{\"scanner_id\":\"dock\",\"beacon_id\":\"b2\",\"rssi\":-80}\n")
            .build();
        let engine = single_gate();
        let (tx, mut rx) = mpsc::channel(16);

        let stats = run(BufReader::new(input), engine.as_ref(), &tx).await.unwrap();
        assert_eq!(
            stats,
            IngestStats {
                lines: 5,
                samples: 3,
                events: 2,
                malformed: 1,
            }
        );

        drop(tx);
        let mut beacons = Vec::new();
        while let Some(event) = rx.recv().await {
            assert_eq!(event.new_state, PresenceState::SingleGate(SingleGateState::Inside));
            beacons.push(event.beacon_id);
        }
        assert_eq!(beacons, vec!["b1".to_string(), "b2".to_string()]);
    }

    #[tokio::test]
    async fn test_run_stops_when_receiver_is_gone() {
        let input = tokio_test::io::Builder::new()
            .read(
                b"{\"scanner_id\":\"dock\",\"beacon_id\":\"b1\",\"rssi\":-60}\n\
                  {\"scanner_id\":\"dock\",\"beacon_id\":\"b2\",\"rssi\":-60}\n",
            )
            .build();
        let engine = single_gate();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let stats = run(BufReader::new(input), engine.as_ref(), &tx).await.unwrap();
        assert_eq!(stats.events, 1);
        assert_eq!(stats.lines, 1);
    }
}
