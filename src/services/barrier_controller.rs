//! Barrier control state machine
//!
//! Consumes one batch of tracked objects per tick and decides when to open,
//! hold open, and close the barrier. Time is always supplied by the caller;
//! the controller never reads a clock and performs no I/O beyond logging.
//!
//! State flow: IDLE -> OPENING -> OPEN -> CLOSING -> IDLE
//! - IDLE: accumulate qualifying downward motion per track until OPEN_THRESH
//! - OPENING / CLOSING: fixed-duration actuator travel
//! - OPEN: held while the target is present or within the close delay
//! - inactivity timeout forces CLOSING from OPENING or OPEN

use crate::domain::barrier::{BarrierState, BarrierThresholds, TransitionEvent, TransitionReason};
use crate::domain::types::{TrackId, TrackedObject};
use rustc_hash::FxHashMap;
use tracing::{debug, info};

pub struct BarrierController {
    thresholds: BarrierThresholds,
    state: BarrierState,
    /// Track responsible for the current open cycle (OPENING/OPEN only)
    target_id: Option<TrackId>,
    /// Accumulated seconds of qualifying downward motion per track
    downward_time: FxHashMap<TrackId, f64>,
    /// When the target vanished while OPEN; None while present
    disappear_time: Option<f64>,
    /// Start of the current OPENING or CLOSING phase
    trigger_time: f64,
    /// Last tick with at least one tracked object, anchored on the first tick
    last_activity_time: Option<f64>,
}

impl BarrierController {
    pub fn new(thresholds: BarrierThresholds) -> Self {
        Self {
            thresholds,
            state: BarrierState::Idle,
            target_id: None,
            downward_time: FxHashMap::default(),
            disappear_time: None,
            trigger_time: 0.0,
            last_activity_time: None,
        }
    }

    #[inline]
    pub fn state(&self) -> BarrierState {
        self.state
    }

    #[inline]
    pub fn target_id(&self) -> Option<TrackId> {
        self.target_id
    }

    pub fn thresholds(&self) -> &BarrierThresholds {
        &self.thresholds
    }

    /// Accumulated qualifying motion for a track (0 if never seen)
    pub fn downward_time(&self, id: TrackId) -> f64 {
        self.downward_time.get(&id).copied().unwrap_or(0.0)
    }

    /// Number of tracks with an accumulator entry
    pub fn tracked_accumulators(&self) -> usize {
        self.downward_time.len()
    }

    /// Run one tick, forcing an open for `forced` instead of the normal
    /// evaluation when the controller is idle.
    ///
    /// A forced open replaces `update()` for that tick so an object cannot
    /// open the barrier twice in the same frame.
    pub fn step(
        &mut self,
        now: f64,
        tracked_objects: &[TrackedObject],
        dt: f64,
        forced: Option<TrackId>,
    ) -> Vec<TransitionEvent> {
        if let Some(id) = forced {
            if let Some(event) = self.force_open(now, id) {
                return vec![event];
            }
        }
        self.update(now, tracked_objects, dt)
    }

    /// Force an immediate OPENING for `id`, bypassing motion accumulation.
    ///
    /// Only effective while IDLE; returns None otherwise. The caller must not
    /// also call `update()` for the same tick.
    pub fn force_open(&mut self, now: f64, id: TrackId) -> Option<TransitionEvent> {
        if self.state != BarrierState::Idle {
            debug!(track_id = %id, state = %self.state, "barrier_force_open_ignored");
            return None;
        }
        // The forcing object is itself present on this tick
        self.last_activity_time = Some(now);
        Some(self.begin_opening(now, id, TransitionReason::ForcedOpen))
    }

    /// Evaluate one tick and return the transitions it caused.
    pub fn update(
        &mut self,
        now: f64,
        tracked_objects: &[TrackedObject],
        dt: f64,
    ) -> Vec<TransitionEvent> {
        let mut events = Vec::new();
        // NaN and negative deltas make no progress
        let dt = if dt > 0.0 { dt } else { 0.0 };

        if !tracked_objects.is_empty() || self.last_activity_time.is_none() {
            self.last_activity_time = Some(now);
        }

        let idle_for = now - self.last_activity_time.unwrap_or(now);
        if idle_for >= self.thresholds.inactivity_timeout
            && !matches!(self.state, BarrierState::Idle | BarrierState::Closing)
        {
            events.push(self.begin_closing(now, TransitionReason::Inactivity));
        }

        match self.state {
            BarrierState::Idle => {
                if let Some(event) = self.accumulate_motion(now, tracked_objects, dt) {
                    events.push(event);
                }
            }
            BarrierState::Opening => {
                if now - self.trigger_time >= self.thresholds.open_close_duration {
                    events.push(self.transition(
                        now,
                        BarrierState::Open,
                        TransitionReason::PhaseComplete,
                    ));
                }
            }
            BarrierState::Open => {
                if let Some(event) = self.check_occupancy(now, tracked_objects) {
                    events.push(event);
                }
            }
            BarrierState::Closing => {
                if now - self.trigger_time >= self.thresholds.open_close_duration {
                    let event = self.transition(
                        now,
                        BarrierState::Idle,
                        TransitionReason::PhaseComplete,
                    );
                    self.downward_time.clear();
                    self.disappear_time = None;
                    events.push(event);
                }
            }
        }

        events
    }

    /// IDLE: accumulate qualifying motion; the first object in caller order
    /// to reach the threshold becomes the target and ends evaluation.
    fn accumulate_motion(
        &mut self,
        now: f64,
        tracked_objects: &[TrackedObject],
        dt: f64,
    ) -> Option<TransitionEvent> {
        for obj in tracked_objects {
            let qualifies = obj.vertical_movement > 0.0
                && obj.movement_angle.abs() >= self.thresholds.min_angle;

            if !qualifies {
                // A missing entry reads as zero
                self.downward_time.remove(&obj.id);
                continue;
            }

            let accumulated = self.downward_time.entry(obj.id).or_insert(0.0);
            *accumulated += dt;
            let accumulated = *accumulated;

            debug!(
                track_id = %obj.id,
                downward_secs = %format!("{:.2}", accumulated),
                angle = %format!("{:.1}", obj.movement_angle),
                "barrier_motion_accumulated"
            );

            if accumulated >= self.thresholds.open_thresh {
                return Some(self.begin_opening(now, obj.id, TransitionReason::Threshold));
            }
        }
        None
    }

    /// OPEN: hold while the target is present, close once it has been gone
    /// for the full close delay.
    fn check_occupancy(
        &mut self,
        now: f64,
        tracked_objects: &[TrackedObject],
    ) -> Option<TransitionEvent> {
        let target_present = self
            .target_id
            .is_some_and(|target| tracked_objects.iter().any(|obj| obj.id == target));

        if target_present {
            if self.disappear_time.take().is_some() {
                debug!(track_id = ?self.target_id, "barrier_target_reappeared");
            }
            return None;
        }

        match self.disappear_time {
            None => {
                debug!(track_id = ?self.target_id, at = %now, "barrier_target_lost");
                self.disappear_time = Some(now);
                None
            }
            Some(since) if now - since >= self.thresholds.close_delay => {
                Some(self.begin_closing(now, TransitionReason::GraceExpired))
            }
            Some(_) => None,
        }
    }

    fn begin_opening(&mut self, now: f64, id: TrackId, reason: TransitionReason) -> TransitionEvent {
        self.target_id = Some(id);
        self.trigger_time = now;
        self.disappear_time = None;
        self.transition(now, BarrierState::Opening, reason)
    }

    /// The event still names the target whose cycle is closing; the
    /// controller itself drops it since CLOSING has no target.
    fn begin_closing(&mut self, now: f64, reason: TransitionReason) -> TransitionEvent {
        self.trigger_time = now;
        let event = self.transition(now, BarrierState::Closing, reason);
        self.target_id = None;
        self.disappear_time = None;
        event
    }

    fn transition(
        &mut self,
        now: f64,
        to: BarrierState,
        reason: TransitionReason,
    ) -> TransitionEvent {
        let from = self.state;
        self.state = to;

        info!(
            from = %from,
            to = %to,
            reason = %reason,
            track_id = ?self.target_id.map(|id| id.0),
            at = %format!("{:.2}", now),
            "barrier_transition"
        );

        TransitionEvent { at: now, from, to, reason, track_id: self.target_id }
    }
}

impl Default for BarrierController {
    fn default() -> Self {
        Self::new(BarrierThresholds::default())
    }
}
