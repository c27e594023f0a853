//! Transition egress - writes barrier transitions to file
//!
//! Transitions are written in JSONL format (one JSON object per line)
//! to the file specified in config.

use crate::domain::barrier::TransitionEvent;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

/// Append-only JSONL writer for transition events
pub struct TransitionLog {
    file_path: String,
}

impl TransitionLog {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "transition_log_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Write a transition to the egress file
    /// Returns true if successful, false otherwise
    pub fn write_transition(&self, event: &TransitionEvent) -> bool {
        match self.append_line(&event.to_json()) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    to = %event.to,
                    reason = %event.reason,
                    error = %e,
                    "transition_egress_failed"
                );
                false
            }
        }
    }

    /// Write multiple transitions, returning how many succeeded
    pub fn write_transitions(&self, events: &[TransitionEvent]) -> usize {
        events.iter().filter(|event| self.write_transition(event)).count()
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "egress_written");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::barrier::{BarrierState, TransitionReason};
    use crate::domain::types::TrackId;
    use std::fs;
    use tempfile::tempdir;

    fn opening(at: f64, tid: i64) -> TransitionEvent {
        TransitionEvent {
            at,
            from: BarrierState::Idle,
            to: BarrierState::Opening,
            reason: TransitionReason::Threshold,
            track_id: Some(TrackId(tid)),
        }
    }

    #[test]
    fn test_write_transition() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("transitions.jsonl");
        let log = TransitionLog::new(file_path.to_str().unwrap());

        assert!(log.write_transition(&opening(1.5, 42)));

        let content = fs::read_to_string(&file_path).unwrap();
        assert!(content.ends_with('\n'));

        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["to"], "opening");
        assert_eq!(parsed["reason"], "threshold");
        assert_eq!(parsed["track_id"], 42);
        assert_eq!(parsed["at"], 1.5);
    }

    #[test]
    fn test_write_transitions_batch() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("transitions.jsonl");
        let log = TransitionLog::new(file_path.to_str().unwrap());

        let events: Vec<TransitionEvent> = (0..4).map(|i| opening(i as f64, i)).collect();
        assert_eq!(log.write_transitions(&events), 4);

        let content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(content.lines().count(), 4);
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let nested_path = dir.path().join("nested").join("dir").join("transitions.jsonl");
        let log = TransitionLog::new(nested_path.to_str().unwrap());

        assert!(log.write_transition(&opening(0.0, 1)));
        assert!(nested_path.exists());
    }

    #[test]
    fn test_append_mode() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("transitions.jsonl");
        fs::write(&file_path, "{\"existing\":\"data\"}\n").unwrap();

        let log = TransitionLog::new(file_path.to_str().unwrap());
        log.write_transition(&opening(2.0, 7));

        let content = fs::read_to_string(&file_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("existing"));
        assert!(lines[1].contains("opening"));
    }
}
