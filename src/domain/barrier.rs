//! Barrier state model and transition events

use crate::domain::types::TrackId;
use serde::Serialize;

/// Logical barrier state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BarrierState {
    Idle,
    Opening,
    Open,
    Closing,
}

impl BarrierState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BarrierState::Idle => "idle",
            BarrierState::Opening => "opening",
            BarrierState::Open => "open",
            BarrierState::Closing => "closing",
        }
    }

    /// Whether the barrier is (or is becoming) passable.
    /// OPENING counts as open for status displays and actuation.
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self, BarrierState::Opening | BarrierState::Open)
    }

    /// Coarse status shown to operators: "open" or "closed"
    pub fn barrier_status(&self) -> &'static str {
        if self.is_open() {
            "open"
        } else {
            "closed"
        }
    }

    /// Gauge value for metrics (0=idle, 1=opening, 2=open, 3=closing)
    pub fn as_gauge(&self) -> u64 {
        match self {
            BarrierState::Idle => 0,
            BarrierState::Opening => 1,
            BarrierState::Open => 2,
            BarrierState::Closing => 3,
        }
    }
}

impl std::fmt::Display for BarrierState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing and angle thresholds for one controller instance (all seconds / degrees)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarrierThresholds {
    /// Continuous qualifying downward motion required to open
    pub open_thresh: f64,
    /// How long the target may be absent while OPEN before closing
    pub close_delay: f64,
    /// Time without any tracked object before a forced close
    pub inactivity_timeout: f64,
    /// Travel time of the OPENING and CLOSING phases
    pub open_close_duration: f64,
    /// Minimum |movement_angle| for motion to count as descending
    pub min_angle: f64,
}

impl Default for BarrierThresholds {
    fn default() -> Self {
        Self {
            open_thresh: 1.0,
            close_delay: 5.0,
            inactivity_timeout: 120.0,
            open_close_duration: 1.0,
            min_angle: 30.0,
        }
    }
}

/// Why a transition happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// Sustained qualifying downward motion reached the open threshold
    Threshold,
    /// Object crossed the forced-open line while idle
    ForcedOpen,
    /// OPENING or CLOSING travel time elapsed
    PhaseComplete,
    /// Target stayed absent for the full close delay
    GraceExpired,
    /// No tracked objects for the inactivity timeout
    Inactivity,
}

impl TransitionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionReason::Threshold => "threshold",
            TransitionReason::ForcedOpen => "forced_open",
            TransitionReason::PhaseComplete => "phase_complete",
            TransitionReason::GraceExpired => "grace_expired",
            TransitionReason::Inactivity => "inactivity",
        }
    }
}

impl std::fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single state change emitted by the controller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionEvent {
    /// Controller time (seconds) of the tick that caused the transition
    pub at: f64,
    pub from: BarrierState,
    pub to: BarrierState,
    pub reason: TransitionReason,
    /// Target track at the time of the transition, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<TrackId>,
}

impl TransitionEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
