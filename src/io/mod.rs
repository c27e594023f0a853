//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `frames` - Tracker payload parsing and JSONL replay
//! - `mqtt` - MQTT client for receiving tracker frames
//! - `mqtt_egress` - MQTT publisher for egress events
//! - `egress_channel` - Typed channel for MQTT egress messages
//! - `egress` - Transition output to file (JSONL format)

pub mod egress;
pub mod egress_channel;
pub mod frames;
pub mod mqtt;
pub mod mqtt_egress;

// Re-export commonly used types
pub use egress::TransitionLog;
pub use egress_channel::{create_egress_channel, EgressSender, GateStatePayload};
pub use mqtt_egress::MqttPublisher;
