//! Domain models - core barrier types
//!
//! This module contains the canonical data types used throughout the system:
//! - `TrackedObject` - one object as seen by the controller on a tick
//! - `FrameObservation` / `Detection` - raw tracker output per frame
//! - `BarrierState` - logical barrier state
//! - `BarrierThresholds` - controller timing and angle thresholds
//! - `TransitionEvent` - a state change and its cause

pub mod barrier;
pub mod types;

pub use barrier::{BarrierState, BarrierThresholds, TransitionEvent, TransitionReason};
pub use types::{Detection, FrameObservation, TrackId, TrackedObject};
