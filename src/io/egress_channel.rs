//! Typed channel for MQTT egress messages
//!
//! Provides a non-blocking way to send events to the MQTT publisher.
//! Uses bounded mpsc channels to prevent unbounded memory growth.

use crate::domain::barrier::TransitionEvent;
use crate::infra::metrics::{MetricsSummary, METRICS_NUM_BUCKETS};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Get current time as epoch milliseconds
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Barrier state change
    GateState(GateStatePayload),
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
}

/// Payload for barrier state changes
#[derive(Debug, Clone, Serialize)]
pub struct GateStatePayload {
    /// Site identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Publish timestamp (epoch ms)
    pub ts: u64,
    /// Controller state (idle, opening, open, closing)
    pub state: String,
    /// Coarse barrier status (open, closed)
    pub barrier: String,
    /// Target track ID (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tid: Option<i64>,
    /// Transition cause
    pub reason: String,
    /// Controller time of the transition (seconds)
    pub at: f64,
}

impl GateStatePayload {
    pub fn from_transition(event: &TransitionEvent) -> Self {
        Self {
            site: None,
            ts: epoch_ms(),
            state: event.to.as_str().to_string(),
            barrier: event.to.barrier_status().to_string(),
            tid: event.track_id.map(|id| id.0),
            reason: event.reason.as_str().to_string(),
            at: event.at,
        }
    }
}

/// Payload for metrics snapshot
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    /// Site identifier
    pub site: String,
    /// Timestamp (epoch ms)
    pub ts: u64,
    /// Barrier state gauge (0=idle, 1=opening, 2=open, 3=closing)
    pub barrier_state: u64,
    pub frames_total: u64,
    pub frames_per_sec: f64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    /// Frame processing latency histogram buckets (Prometheus-style exponential)
    pub lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub active_objects: u64,
    pub threshold_opens: u64,
    pub forced_opens: u64,
    pub phase_completions: u64,
    pub grace_closes: u64,
    pub inactivity_closes: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub frames_invalid: u64,
}

impl MetricsPayload {
    pub fn from_summary(summary: MetricsSummary, site: String) -> Self {
        Self {
            site,
            ts: epoch_ms(),
            barrier_state: summary.barrier_state,
            frames_total: summary.frames_total,
            frames_per_sec: summary.frames_per_sec,
            avg_latency_us: summary.avg_process_latency_us,
            max_latency_us: summary.max_process_latency_us,
            lat_buckets: summary.lat_buckets,
            lat_p50_us: summary.lat_p50_us,
            lat_p95_us: summary.lat_p95_us,
            lat_p99_us: summary.lat_p99_us,
            active_objects: summary.active_objects,
            threshold_opens: summary.threshold_opens,
            forced_opens: summary.forced_opens,
            phase_completions: summary.phase_completions,
            grace_closes: summary.grace_closes,
            inactivity_closes: summary.inactivity_closes,
            frames_received: summary.frames_received,
            frames_dropped: summary.frames_dropped,
            frames_invalid: summary.frames_invalid,
        }
    }
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
}

impl EgressSender {
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String) -> Self {
        Self { tx, site_id }
    }

    /// Send a barrier transition
    /// Injects site_id into the payload
    pub fn send_transition(&self, event: &TransitionEvent) {
        let mut payload = GateStatePayload::from_transition(event);
        payload.site = Some(self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::GateState(payload));
    }

    /// Send a metrics snapshot
    pub fn send_metrics(&self, summary: MetricsSummary) {
        let payload = MetricsPayload::from_summary(summary, self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::Metrics(payload));
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::barrier::{BarrierState, TransitionReason};
    use crate::domain::types::TrackId;
    use crate::infra::metrics::Metrics;

    #[test]
    fn test_send_transition_injects_site() {
        let (sender, mut rx) = create_egress_channel(4, "north-gate".to_string());
        sender.send_transition(&TransitionEvent {
            at: 3.0,
            from: BarrierState::Idle,
            to: BarrierState::Opening,
            reason: TransitionReason::ForcedOpen,
            track_id: Some(TrackId(11)),
        });

        match rx.try_recv().unwrap() {
            EgressMessage::GateState(payload) => {
                assert_eq!(payload.site.as_deref(), Some("north-gate"));
                assert_eq!(payload.state, "opening");
                assert_eq!(payload.barrier, "open");
                assert_eq!(payload.tid, Some(11));
                assert_eq!(payload.reason, "forced_open");
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_full_channel_drops() {
        let (sender, mut rx) = create_egress_channel(1, "site".to_string());
        let metrics = Metrics::new();
        sender.send_metrics(metrics.report());
        sender.send_metrics(metrics.report());

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_metrics_payload_carries_counters() {
        let metrics = Metrics::new();
        metrics.record_frame_received();
        metrics.record_frame_received();
        metrics.record_frame_processed(150, 1);
        metrics.record_transition(BarrierState::Open, TransitionReason::PhaseComplete);

        let payload = MetricsPayload::from_summary(metrics.report(), "gate-1".to_string());
        let json: serde_json::Value = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["frames_received"], 2);
        assert_eq!(json["phase_completions"], 1);
        assert_eq!(json["barrier_state"], BarrierState::Open.as_gauge());
        assert!(json["lat_p95_us"].as_u64().unwrap() > 0);
        assert!(json["lat_p50_us"].as_u64().unwrap() <= json["lat_p95_us"].as_u64().unwrap());
    }

    #[test]
    fn test_gate_payload_json() {
        let payload = GateStatePayload::from_transition(&TransitionEvent {
            at: 9.5,
            from: BarrierState::Opening,
            to: BarrierState::Open,
            reason: TransitionReason::PhaseComplete,
            track_id: None,
        });
        let json: serde_json::Value = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["state"], "open");
        assert!(json.get("tid").is_none());
        assert!(json.get("site").is_none());
    }
}
