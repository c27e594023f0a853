//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `barrier_controller` - Barrier state machine (IDLE/OPENING/OPEN/CLOSING)
//! - `motion` - Per-track motion estimation from bounding boxes
//! - `frame_processor` - Per-frame orchestration around the controller

pub mod barrier_controller;
pub mod frame_processor;
pub mod motion;

// Re-export commonly used types
pub use barrier_controller::BarrierController;
pub use frame_processor::FrameProcessor;
pub use motion::MotionEstimator;
