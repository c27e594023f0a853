//! Per-frame orchestration around the barrier controller
//!
//! The FrameProcessor is the sole owner of the controller. For every frame it:
//! - derives the controller clock and `dt` from the frame timestamp
//! - turns detections into tracked objects (motion estimation)
//! - applies the forced-open line rule
//! - drives the controller exactly once
//! - fans transitions out to the transition log, MQTT egress and metrics
//!
//! The clock source is fixed by the first frame. A stream that starts with
//! timestamps stays on the tracker clock, and a frame missing one reuses the
//! previous time. A stream that starts without timestamps stays on the local
//! monotonic clock and ignores timestamps that show up later.

#[cfg(test)]
mod tests;

use crate::domain::barrier::{BarrierState, TransitionEvent};
use crate::domain::types::{Detection, FrameObservation, TrackId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::egress::TransitionLog;
use crate::io::frames::timestamp_to_secs;
use crate::io::EgressSender;
use crate::services::barrier_controller::BarrierController;
use crate::services::motion::MotionEstimator;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Where the controller clock comes from, chosen on the first frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClockSource {
    /// Frame timestamps (epoch seconds)
    Frame,
    /// Seconds since the processor started
    Monotonic,
}

pub struct FrameProcessor {
    /// Barrier state machine
    pub(crate) controller: BarrierController,
    /// Per-track centre history
    pub(crate) motion: MotionEstimator,
    /// Appends transitions to file
    transition_log: TransitionLog,
    /// MQTT egress sender (optional)
    egress_sender: Option<EgressSender>,
    metrics: Arc<Metrics>,
    forced_open_enabled: bool,
    forced_open_line_ratio: f64,
    /// Controller clock of the previous frame
    prev_now: Option<f64>,
    clock: Option<ClockSource>,
    /// Fallback clock origin for frames without a timestamp
    started: Instant,
}

impl FrameProcessor {
    pub fn new(config: &Config, metrics: Arc<Metrics>, egress_sender: Option<EgressSender>) -> Self {
        Self {
            controller: BarrierController::new(config.barrier_thresholds()),
            motion: MotionEstimator::new(
                config.motion_history_len(),
                config.motion_track_ttl_secs(),
            ),
            transition_log: TransitionLog::new(config.egress_file()),
            egress_sender,
            metrics,
            forced_open_enabled: config.forced_open_enabled(),
            forced_open_line_ratio: config.forced_open_line_ratio(),
            prev_now: None,
            clock: None,
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> BarrierState {
        self.controller.state()
    }

    pub fn target_id(&self) -> Option<TrackId> {
        self.controller.target_id()
    }

    /// Consume frames until the channel closes or shutdown is signalled
    pub async fn run(
        &mut self,
        mut frame_rx: mpsc::Receiver<FrameObservation>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(state = %self.state(), "frame_processor_started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("frame_processor_shutdown");
                        break;
                    }
                }
                frame = frame_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            self.process_frame(&frame);
                        }
                        None => {
                            info!("frame_channel_closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Process a single frame and return the transitions it caused
    pub fn process_frame(&mut self, frame: &FrameObservation) -> Vec<TransitionEvent> {
        let process_start = Instant::now();

        let now = self.frame_clock(frame);
        let dt = match self.prev_now {
            Some(prev) => (now - prev).max(0.0),
            None => 0.0,
        };
        self.prev_now = Some(now);

        let objects = self.motion.observe_frame(now, &frame.detections);
        let forced = self.forced_open_candidate(frame.height, &frame.detections);

        let events = self.controller.step(now, &objects, dt, forced);

        if !events.is_empty() {
            self.emit(&events);
        }

        let latency_us = process_start.elapsed().as_micros() as u64;
        self.metrics.record_frame_processed(latency_us, objects.len());

        events
    }

    /// Controller time for a frame under the pinned clock source
    fn frame_clock(&mut self, frame: &FrameObservation) -> f64 {
        let stamped = timestamp_to_secs(&frame.time);
        let source = *self.clock.get_or_insert_with(|| {
            let source =
                if stamped.is_some() { ClockSource::Frame } else { ClockSource::Monotonic };
            info!(source = ?source, "frame_clock_selected");
            source
        });

        match (source, stamped) {
            (ClockSource::Frame, Some(secs)) => secs,
            (ClockSource::Frame, None) => {
                debug!("frame_without_timestamp");
                self.prev_now.unwrap_or(0.0)
            }
            (ClockSource::Monotonic, stamped) => {
                if stamped.is_some() {
                    debug!("frame_timestamp_ignored");
                }
                self.started.elapsed().as_secs_f64()
            }
        }
    }

    /// First detection below the forced-open line while idle
    fn forced_open_candidate(&self, height: f64, detections: &[Detection]) -> Option<TrackId> {
        if !self.forced_open_enabled || self.controller.state() != BarrierState::Idle {
            return None;
        }
        let line_y = height * self.forced_open_line_ratio;
        detections
            .iter()
            .find(|det| det.center().1 > line_y)
            .map(|det| TrackId(det.track_id))
    }

    fn emit(&self, events: &[TransitionEvent]) {
        let written = self.transition_log.write_transitions(events);
        if written < events.len() {
            warn!(written = %written, total = %events.len(), "transition_log_incomplete");
        }
        for event in events {
            if let Some(ref sender) = self.egress_sender {
                sender.send_transition(event);
            }
            self.metrics.record_transition(event.to, event.reason);
        }
    }
}
