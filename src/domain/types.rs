//! Shared types for the barrier gateway

use serde::{Deserialize, Deserializer, Serialize};

/// Newtype wrapper for tracker-assigned object IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TrackId(pub i64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One object as seen by the barrier controller on a single tick
///
/// Only lives for the duration of one controller call; the controller keeps
/// derived per-id accumulators, never the object itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedObject {
    pub id: TrackId,
    /// Reference point y coordinate (bounding-box centre)
    pub vertical_position: f64,
    /// Signed change of `vertical_position` since this id's previous tick (0 on first sighting)
    pub vertical_movement: f64,
    /// Signed degrees from horizontal, positive when moving down the frame
    pub movement_angle: f64,
}

impl TrackedObject {
    #[inline]
    pub fn new(id: i64, vertical_position: f64, vertical_movement: f64, movement_angle: f64) -> Self {
        Self { id: TrackId(id), vertical_position, vertical_movement, movement_angle }
    }
}

/// Raw tracker output for a single object
#[derive(Debug, Clone, Deserialize)]
pub struct Detection {
    pub track_id: i64,
    /// Bounding box as [x1, y1, x2, y2] in pixels
    pub bbox: [f64; 4],
}

impl Detection {
    /// Centre of the bounding box
    #[inline]
    pub fn center(&self) -> (f64, f64) {
        let [x1, y1, x2, y2] = self.bbox;
        ((x1 + x2) / 2.0, (y1 + y2) / 2.0)
    }
}

/// One processed video frame from the upstream tracker
#[derive(Debug, Clone, Deserialize)]
pub struct FrameObservation {
    /// Timestamp - can be ISO 8601 string or epoch milliseconds integer
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub time: TimestampValue,
    /// Frame height in pixels (used for the forced-open line)
    pub height: f64,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

/// Batch wrapper, some trackers publish several frames per message
#[derive(Debug, Deserialize)]
pub struct FrameBatch {
    pub frames: Vec<FrameObservation>,
}

/// Timestamp that can be either ISO 8601 string or epoch milliseconds
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TimestampValue {
    #[default]
    None,
    IsoString(String),
    EpochMs(u64),
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<TimestampValue, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = TimestampValue;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or integer timestamp")
        }

        fn visit_str<E>(self, value: &str) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value.to_string()))
        }

        fn visit_string<E>(self, value: String) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::EpochMs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            let epoch_ms = u64::try_from(value).unwrap_or(0);
            Ok(TimestampValue::EpochMs(epoch_ms))
        }

        fn visit_f64<E>(self, value: f64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            let epoch_ms = if value.is_finite() && value > 0.0 { value as u64 } else { 0 };
            Ok(TimestampValue::EpochMs(epoch_ms))
        }

        fn visit_unit<E>(self) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::None)
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_center() {
        let det = Detection { track_id: 1, bbox: [100.0, 200.0, 180.0, 320.0] };
        assert_eq!(det.center(), (140.0, 260.0));
    }

    #[test]
    fn test_frame_epoch_time() {
        let json = r#"{"time": 1767630090048, "height": 720, "detections": []}"#;
        let frame: FrameObservation = serde_json::from_str(json).unwrap();
        assert_eq!(frame.time, TimestampValue::EpochMs(1767630090048));
        assert_eq!(frame.height, 720.0);
    }

    #[test]
    fn test_frame_iso_time_and_missing_detections() {
        let json = r#"{"time": "2026-01-05T16:41:30.048+00:00", "height": 480}"#;
        let frame: FrameObservation = serde_json::from_str(json).unwrap();
        assert!(matches!(frame.time, TimestampValue::IsoString(_)));
        assert!(frame.detections.is_empty());
    }

    #[test]
    fn test_frame_without_time() {
        let json = r#"{"height": 480, "detections": [{"track_id": 3, "bbox": [0, 0, 10, 10]}]}"#;
        let frame: FrameObservation = serde_json::from_str(json).unwrap();
        assert_eq!(frame.time, TimestampValue::None);
        assert_eq!(frame.detections[0].track_id, 3);
    }
}
