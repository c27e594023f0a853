//! Tests for the FrameProcessor module

use super::*;
use crate::domain::barrier::TransitionReason;
use crate::domain::types::TimestampValue;
use crate::io::create_egress_channel;
use crate::io::egress_channel::EgressMessage;
use tempfile::TempDir;

const HEIGHT: f64 = 720.0;
/// Base frame time in epoch ms
const T0: u64 = 1_767_630_000_000;

/// Test harness that keeps the egress file directory alive
struct TestProcessor {
    processor: FrameProcessor,
    metrics: Arc<Metrics>,
    dir: TempDir,
}

impl TestProcessor {
    fn transitions_file(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("transitions.jsonl")).unwrap_or_default()
    }
}

impl std::ops::Deref for TestProcessor {
    type Target = FrameProcessor;
    fn deref(&self) -> &Self::Target {
        &self.processor
    }
}

impl std::ops::DerefMut for TestProcessor {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.processor
    }
}

fn create_test_processor(forced_open: bool) -> TestProcessor {
    let dir = TempDir::new().unwrap();
    let egress = dir.path().join("transitions.jsonl");
    let config = Config::default()
        .with_egress_file(egress.to_str().unwrap())
        .with_forced_open(forced_open);
    let metrics = Arc::new(Metrics::new());
    let processor = FrameProcessor::new(&config, metrics.clone(), None);
    TestProcessor { processor, metrics, dir }
}

/// Detection with its centre at (cx, cy)
fn det(track_id: i64, cx: f64, cy: f64) -> Detection {
    Detection { track_id, bbox: [cx - 20.0, cy - 40.0, cx + 20.0, cy + 40.0] }
}

fn frame_at(ms: u64, detections: Vec<Detection>) -> FrameObservation {
    FrameObservation { time: TimestampValue::EpochMs(ms), height: HEIGHT, detections }
}

#[test]
fn test_forced_open_below_line() {
    let mut p = create_test_processor(true);

    // Line sits at 240px; centre at 300px is below it
    let events = p.process_frame(&frame_at(T0, vec![det(5, 100.0, 300.0)]));

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].to, BarrierState::Opening);
    assert_eq!(events[0].reason, TransitionReason::ForcedOpen);
    assert_eq!(events[0].track_id, Some(TrackId(5)));
    assert_eq!(p.state(), BarrierState::Opening);
    assert_eq!(p.target_id(), Some(TrackId(5)));
    assert_eq!(p.metrics.transitions(TransitionReason::ForcedOpen), 1);
    assert_eq!(p.metrics.barrier_state(), BarrierState::Opening.as_gauge());
}

#[test]
fn test_forced_open_picks_first_detection_below_line() {
    let mut p = create_test_processor(true);

    let events = p.process_frame(&frame_at(
        T0,
        vec![det(1, 50.0, 100.0), det(2, 150.0, 500.0), det(3, 250.0, 600.0)],
    ));

    assert_eq!(events.len(), 1);
    assert_eq!(p.target_id(), Some(TrackId(2)));
}

#[test]
fn test_no_forced_open_above_line() {
    let mut p = create_test_processor(true);

    let events = p.process_frame(&frame_at(T0, vec![det(5, 100.0, 200.0)]));

    assert!(events.is_empty());
    assert_eq!(p.state(), BarrierState::Idle);
}

#[test]
fn test_forced_open_disabled() {
    let mut p = create_test_processor(false);

    let events = p.process_frame(&frame_at(T0, vec![det(5, 100.0, 600.0)]));

    assert!(events.is_empty());
    assert_eq!(p.state(), BarrierState::Idle);
}

#[test]
fn test_forced_open_suppresses_update_for_that_frame() {
    let mut p = create_test_processor(true);

    // Track 9 accumulates downward motion above the line
    let mut ms = T0;
    let mut y = 60.0;
    for _ in 0..4 {
        p.process_frame(&frame_at(ms, vec![det(9, 100.0, y)]));
        ms += 300;
        y += 10.0;
    }
    assert_eq!(p.state(), BarrierState::Idle);

    // Track 9 would cross the threshold on this frame, but track 4 below the
    // line forces the open first and the normal evaluation is skipped
    let events = p.process_frame(&frame_at(ms, vec![det(9, 100.0, y), det(4, 300.0, 650.0)]));

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, TransitionReason::ForcedOpen);
    assert_eq!(p.target_id(), Some(TrackId(4)));
}

#[test]
fn test_threshold_open_from_motion() {
    let mut p = create_test_processor(false);

    // 45 degree downward motion, 0.3s per frame: dt accumulates from the
    // second frame and reaches 1.0s on the fifth
    let mut opened_at = None;
    for i in 0..6u64 {
        let step = i as f64 * 10.0;
        let events =
            p.process_frame(&frame_at(T0 + i * 300, vec![det(3, 100.0 + step, 50.0 + step)]));
        if let Some(event) = events.first() {
            assert_eq!(event.reason, TransitionReason::Threshold);
            opened_at = Some(i);
            break;
        }
    }

    assert_eq!(opened_at, Some(4));
    assert_eq!(p.state(), BarrierState::Opening);
    assert_eq!(p.target_id(), Some(TrackId(3)));
}

#[test]
fn test_full_cycle_writes_transition_log() {
    let mut p = create_test_processor(true);

    p.process_frame(&frame_at(T0, vec![det(5, 100.0, 300.0)]));
    // OPENING -> OPEN after the 1s phase
    let events = p.process_frame(&frame_at(T0 + 1_000, vec![det(5, 100.0, 320.0)]));
    assert_eq!(events[0].to, BarrierState::Open);

    // Target leaves; grace starts then expires after 5s
    assert!(p.process_frame(&frame_at(T0 + 2_000, vec![])).is_empty());
    let events = p.process_frame(&frame_at(T0 + 7_000, vec![]));
    assert_eq!(events[0].to, BarrierState::Closing);
    assert_eq!(events[0].reason, TransitionReason::GraceExpired);

    let events = p.process_frame(&frame_at(T0 + 8_000, vec![]));
    assert_eq!(events[0].to, BarrierState::Idle);

    let content = p.transitions_file();
    let lines: Vec<serde_json::Value> =
        content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    let states: Vec<&str> = lines.iter().map(|v| v["to"].as_str().unwrap()).collect();
    assert_eq!(states, vec!["opening", "open", "closing", "idle"]);
    assert_eq!(lines[0]["reason"], "forced_open");
    assert_eq!(lines[2]["track_id"], 5);
    assert_eq!(p.metrics.barrier_state(), BarrierState::Idle.as_gauge());
}

#[test]
fn test_dt_clamped_on_out_of_order_frames() {
    let mut p = create_test_processor(false);

    p.process_frame(&frame_at(T0 + 5_000, vec![det(3, 100.0, 50.0)]));
    // Earlier timestamp: dt clamps to 0 and nothing accumulates
    p.process_frame(&frame_at(T0, vec![det(3, 110.0, 60.0)]));

    assert_eq!(p.controller.downward_time(TrackId(3)), 0.0);
}

#[test]
fn test_frame_without_timestamp_uses_monotonic_clock() {
    let mut p = create_test_processor(true);

    let frame = FrameObservation {
        time: TimestampValue::None,
        height: HEIGHT,
        detections: vec![det(8, 100.0, 500.0)],
    };
    let events = p.process_frame(&frame);

    assert_eq!(events.len(), 1);
    assert!(events[0].at >= 0.0);
    assert!(events[0].at < 60.0, "monotonic clock starts near zero");
}

#[test]
fn test_missing_timestamp_holds_frame_clock() {
    let mut p = create_test_processor(true);
    p.process_frame(&frame_at(T0, vec![det(5, 100.0, 300.0)]));

    let untimed = FrameObservation {
        time: TimestampValue::None,
        height: HEIGHT,
        detections: vec![det(5, 100.0, 300.0)],
    };
    assert!(p.process_frame(&untimed).is_empty());
    assert_eq!(p.state(), BarrierState::Opening);

    // Timestamps resume on the same clock
    let events = p.process_frame(&frame_at(T0 + 1_000, vec![det(5, 100.0, 300.0)]));
    assert_eq!(events[0].to, BarrierState::Open);
}

#[test]
fn test_monotonic_clock_ignores_later_timestamps() {
    let mut p = create_test_processor(true);

    let untimed = FrameObservation {
        time: TimestampValue::None,
        height: HEIGHT,
        detections: vec![det(5, 100.0, 300.0)],
    };
    assert_eq!(p.process_frame(&untimed).len(), 1);

    // An epoch timestamp must not complete the opening phase instantly
    let events = p.process_frame(&frame_at(T0, vec![det(5, 100.0, 300.0)]));
    assert!(events.is_empty());
    assert_eq!(p.state(), BarrierState::Opening);
    assert!(p.prev_now.unwrap() < 60.0);
}

#[test]
fn test_metrics_record_processed_frames() {
    let mut p = create_test_processor(false);

    p.process_frame(&frame_at(T0, vec![det(1, 10.0, 10.0), det(2, 20.0, 20.0)]));
    p.process_frame(&frame_at(T0 + 40, vec![]));

    assert_eq!(p.metrics.frames_total(), 2);
    let summary = p.metrics.report();
    assert_eq!(summary.active_objects, 0);
}

#[test]
fn test_transitions_published_to_egress() {
    let dir = TempDir::new().unwrap();
    let egress = dir.path().join("transitions.jsonl");
    let config = Config::default().with_egress_file(egress.to_str().unwrap());
    let (sender, mut rx) = create_egress_channel(8, "gate-1".to_string());
    let mut processor = FrameProcessor::new(&config, Arc::new(Metrics::new()), Some(sender));

    processor.process_frame(&frame_at(T0, vec![det(5, 100.0, 300.0)]));

    match rx.try_recv().unwrap() {
        EgressMessage::GateState(payload) => {
            assert_eq!(payload.site.as_deref(), Some("gate-1"));
            assert_eq!(payload.state, "opening");
            assert_eq!(payload.tid, Some(5));
        }
        other => panic!("unexpected message {:?}", other),
    }
}

#[tokio::test]
async fn test_run_until_channel_closed() {
    let mut p = create_test_processor(true);
    let (tx, rx) = mpsc::channel(8);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    tx.send(frame_at(T0, vec![det(5, 100.0, 300.0)])).await.unwrap();
    tx.send(frame_at(T0 + 1_000, vec![det(5, 100.0, 300.0)])).await.unwrap();
    drop(tx);

    p.run(rx, shutdown_rx).await;

    assert_eq!(p.state(), BarrierState::Open);
    assert_eq!(p.metrics.frames_total(), 2);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let mut p = create_test_processor(true);
    let (_tx, rx) = mpsc::channel::<FrameObservation>(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    shutdown_tx.send(true).unwrap();
    p.run(rx, shutdown_rx).await;

    assert_eq!(p.state(), BarrierState::Idle);
}
