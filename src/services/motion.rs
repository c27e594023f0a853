//! Per-track motion estimation
//!
//! Turns raw bounding boxes into the `TrackedObject` tuples the barrier
//! controller consumes: bounding-box centre, vertical delta since the
//! track's previous sighting, and the movement angle from horizontal.

use crate::domain::types::{Detection, TrackId, TrackedObject};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use tracing::debug;

/// Recent centres of one track
#[derive(Debug)]
struct TrackHistory {
    points: VecDeque<(f64, f64)>,
    last_seen: f64,
}

pub struct MotionEstimator {
    histories: FxHashMap<TrackId, TrackHistory>,
    /// Maximum stored points per track
    history_len: usize,
    /// Tracks unseen for longer than this (seconds) are forgotten
    track_ttl_secs: f64,
}

impl MotionEstimator {
    pub fn new(history_len: usize, track_ttl_secs: f64) -> Self {
        Self {
            histories: FxHashMap::default(),
            history_len: history_len.max(2),
            track_ttl_secs,
        }
    }

    /// Signed degrees of the movement vector from horizontal.
    ///
    /// Magnitude is in [0, 90], 90 for purely vertical motion. Positive when
    /// moving toward larger y (down the frame). No movement yields 0.
    pub fn movement_angle(dx: f64, dy: f64) -> f64 {
        if dx == 0.0 && dy == 0.0 {
            return 0.0;
        }
        let magnitude = dy.abs().atan2(dx.abs()).to_degrees();
        if dy < 0.0 {
            -magnitude
        } else {
            magnitude
        }
    }

    /// Observe one detection at time `now` and derive its tracked-object tuple
    pub fn observe(&mut self, now: f64, detection: &Detection) -> TrackedObject {
        let id = TrackId(detection.track_id);
        let (cx, cy) = detection.center();
        let history_len = self.history_len;

        let history = self.histories.entry(id).or_insert_with(|| TrackHistory {
            points: VecDeque::with_capacity(history_len),
            last_seen: now,
        });

        let (movement_y, angle) = match history.points.back() {
            Some(&(px, py)) => {
                let dx = cx - px;
                let dy = cy - py;
                (dy, Self::movement_angle(dx, dy))
            }
            None => (0.0, 0.0),
        };

        if history.points.len() == history_len {
            history.points.pop_front();
        }
        history.points.push_back((cx, cy));
        history.last_seen = now;

        TrackedObject { id, vertical_position: cy, vertical_movement: movement_y, movement_angle: angle }
    }

    /// Observe every detection of a frame, preserving detection order
    pub fn observe_frame(&mut self, now: f64, detections: &[Detection]) -> Vec<TrackedObject> {
        let objects: Vec<TrackedObject> =
            detections.iter().map(|det| self.observe(now, det)).collect();
        self.evict_stale(now);
        objects
    }

    /// Forget tracks not seen within the TTL
    pub fn evict_stale(&mut self, now: f64) {
        let ttl = self.track_ttl_secs;
        let before = self.histories.len();
        self.histories.retain(|_, history| now - history.last_seen <= ttl);
        let evicted = before - self.histories.len();
        if evicted > 0 {
            debug!(evicted = %evicted, remaining = %self.histories.len(), "motion_tracks_evicted");
        }
    }

    /// Stored centres for a track, oldest first
    pub fn history(&self, id: TrackId) -> Vec<(f64, f64)> {
        self.histories
            .get(&id)
            .map(|h| h.points.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn active_tracks(&self) -> usize {
        self.histories.len()
    }
}

impl Default for MotionEstimator {
    fn default() -> Self {
        Self::new(30, 2.0)
    }
}
