//! Event stream output: one JSON object per line.

use slipway_core::StateChangeEvent;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Write every event received on `events` to `writer` until all senders are gone.
///
/// Returns the number of events written.
///
/// # Errors
///
/// Returns an error if an event cannot be encoded or written.
pub async fn write_events<W>(
    mut events: mpsc::Receiver<StateChangeEvent>,
    mut writer: W,
) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(event) = events.recv().await {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use slipway_core::{Direction, PresenceState, SingleGateState};

    fn event(beacon_id: &str) -> StateChangeEvent {
        StateChangeEvent {
            beacon_id: beacon_id.to_string(),
            entity_id: Some("boat-1".to_string()),
            scanner_id: None,
            old_state: PresenceState::SingleGate(SingleGateState::Inside),
            new_state: PresenceState::SingleGate(SingleGateState::Outside),
            direction: Some(Direction::Leave),
            confidence: 1.0,
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_events_are_written_as_json_lines() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(event("b1")).await.unwrap();
        tx.send(event("b2")).await.unwrap();
        drop(tx);

        let mut out = Vec::new();
        let written = write_events(rx, &mut out).await.unwrap();
        assert_eq!(written, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: StateChangeEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first, event("b1"));
        assert!(lines[1].contains(r#""beacon_id":"b2""#));
        assert!(lines[1].contains(r#""direction":"leave""#));
        assert!(!lines[1].contains("scanner_id"));
    }
}
