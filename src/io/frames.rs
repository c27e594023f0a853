//! Frame parsing and JSONL replay
//!
//! The upstream tracker emits one JSON object per processed frame, either a
//! single `FrameObservation` or a `{"frames": [...]}` batch. The same format
//! is used for live MQTT payloads and for replay files (one object per line).

use crate::domain::types::{FrameBatch, FrameObservation, TimestampValue};
use crate::infra::metrics::Metrics;
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Parse a tracker payload into frames
///
/// Accepts a single frame object or a batch. Returns an error for anything
/// else so callers can count invalid input.
pub fn parse_frames(json_str: &str) -> Result<Vec<FrameObservation>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(json_str)?;
    if value.get("frames").is_some() {
        let batch: FrameBatch = serde_json::from_value(value)?;
        Ok(batch.frames)
    } else {
        let frame: FrameObservation = serde_json::from_value(value)?;
        Ok(vec![frame])
    }
}

/// Parse ISO 8601 timestamp to epoch milliseconds, None before 1970
pub fn parse_iso_time(time_str: &str) -> Option<u64> {
    // "2026-01-05T16:41:30.048+00:00" (RFC 3339)
    let dt = OffsetDateTime::parse(time_str, &Rfc3339).ok()?;
    u64::try_from(dt.unix_timestamp_nanos() / 1_000_000).ok()
}

/// Extract epoch seconds from a frame timestamp, None if absent or unparseable
pub fn timestamp_to_secs(ts: &TimestampValue) -> Option<f64> {
    let ms = match ts {
        TimestampValue::EpochMs(ms) => *ms,
        TimestampValue::IsoString(s) => parse_iso_time(s)?,
        TimestampValue::None => return None,
    };
    if ms == 0 {
        return None;
    }
    Some(ms as f64 / 1000.0)
}

/// Replay a JSONL file of frames into the frame channel
///
/// Uses blocking `send` so replay applies backpressure instead of dropping.
/// Blank lines are skipped, malformed lines are counted and skipped.
/// Returns the number of frames sent.
pub async fn replay_file<P: AsRef<Path>>(
    path: P,
    frame_tx: mpsc::Sender<FrameObservation>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<u64> {
    let path = path.as_ref();
    let file = File::open(path)
        .await
        .with_context(|| format!("Failed to open replay file {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();

    info!(file = %path.display(), "replay_started");

    let mut sent = 0u64;
    let mut line_no = 0u64;

    loop {
        let line = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(sent = %sent, "replay_shutdown");
                    break;
                }
                continue;
            }
            line = lines.next_line() => line
                .with_context(|| format!("Failed to read replay file {}", path.display()))?,
        };

        let Some(line) = line else { break };
        line_no += 1;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let frames = match parse_frames(trimmed) {
            Ok(frames) => frames,
            Err(e) => {
                metrics.record_frame_invalid();
                warn!(line = %line_no, error = %e, "replay_line_invalid");
                continue;
            }
        };

        for frame in frames {
            metrics.record_frame_received();
            if frame_tx.send(frame).await.is_err() {
                debug!("replay_frame_channel_closed");
                return Ok(sent);
            }
            sent += 1;
        }
    }

    info!(file = %path.display(), frames = %sent, "replay_finished");
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_single_frame() {
        let json = r#"{"time": 1767630090048, "height": 720,
            "detections": [{"track_id": 7, "bbox": [100.0, 200.0, 180.0, 320.0]}]}"#;
        let frames = parse_frames(json).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].detections[0].track_id, 7);
    }

    #[test]
    fn test_parse_batch() {
        let json = r#"{"frames": [
            {"time": 1000, "height": 720, "detections": []},
            {"time": 1040, "height": 720, "detections": []}
        ]}"#;
        let frames = parse_frames(json).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].time, TimestampValue::EpochMs(1040));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_frames("not json").is_err());
        assert!(parse_frames(r#"{"detections": []}"#).is_err());
    }

    #[test]
    fn test_parse_iso_time() {
        let ms = parse_iso_time("2026-01-05T16:41:30.048+00:00").unwrap();
        assert!(ms > 1767000000000, "timestamp should be in 2026");
        assert!(ms < 1800000000000, "timestamp should be before 2027");
        assert_eq!(ms % 1000, 48);

        assert!(parse_iso_time("not a timestamp").is_none());
        assert!(parse_iso_time("").is_none());
    }

    #[test]
    fn test_parse_iso_time_before_epoch() {
        assert_eq!(parse_iso_time("1970-01-01T00:00:00Z"), Some(0));
        assert!(parse_iso_time("1969-12-31T23:59:59Z").is_none());
        assert!(parse_iso_time("1900-01-01T00:00:00+00:00").is_none());
        assert_eq!(
            timestamp_to_secs(&TimestampValue::IsoString("1969-07-20T20:17:40Z".to_string())),
            None
        );
    }

    #[test]
    fn test_timestamp_to_secs() {
        assert_eq!(timestamp_to_secs(&TimestampValue::EpochMs(1500)), Some(1.5));
        assert_eq!(timestamp_to_secs(&TimestampValue::EpochMs(0)), None);
        assert_eq!(timestamp_to_secs(&TimestampValue::None), None);
        assert_eq!(timestamp_to_secs(&TimestampValue::IsoString("garbage".to_string())), None);
    }

    #[tokio::test]
    async fn test_replay_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"time": 1000, "height": 720, "detections": []}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "garbage").unwrap();
        writeln!(file, r#"{{"frames": [{{"time": 1040, "height": 720}}, {{"time": 1080, "height": 720}}]}}"#)
            .unwrap();
        file.flush().unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let metrics = Arc::new(Metrics::new());

        let sent = replay_file(file.path(), tx, metrics.clone(), shutdown_rx).await.unwrap();
        assert_eq!(sent, 3);
        assert_eq!(metrics.frames_invalid(), 1);
        assert_eq!(metrics.frames_received(), 3);

        let mut times = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            times.push(frame.time);
        }
        assert_eq!(
            times,
            vec![
                TimestampValue::EpochMs(1000),
                TimestampValue::EpochMs(1040),
                TimestampValue::EpochMs(1080)
            ]
        );
    }

    #[tokio::test]
    async fn test_replay_missing_file() {
        let (tx, _rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let result =
            replay_file("/nonexistent/frames.jsonl", tx, Arc::new(Metrics::new()), shutdown_rx)
                .await;
        assert!(result.is_err());
    }
}
