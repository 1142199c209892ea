//! Recording state management
//!
//! Defines the recording state machine and the summary reported when a
//! session shuts down.

use crate::utils::error::{AppError, ErrorReport};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle of the video channel within one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// Nothing captured yet
    #[default]
    Idle,
    /// Capturing frames
    Recording,
    /// Flushing and closing output
    Finalizing,
    /// Output complete and valid
    Done,
}

impl RecordingState {
    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(self, next: RecordingState) -> bool {
        use RecordingState::*;
        matches!(
            (self, next),
            (Idle, Recording) | (Idle, Finalizing) | (Recording, Finalizing) | (Finalizing, Done)
        )
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub fn transition(&mut self, next: RecordingState) -> Result<(), AppError> {
        if !self.can_transition_to(next) {
            return Err(AppError::State(format!(
                "cannot move from {:?} to {:?}",
                self, next
            )));
        }
        *self = next;
        Ok(())
    }
}

/// Why capture ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureEnd {
    /// The configured duration elapsed
    Elapsed,
    /// An interrupt or explicit stop ended capture
    Interrupted,
}

/// Counts and outcomes reported at shutdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session directory
    pub session_path: String,

    /// When the session was constructed
    pub started_at: DateTime<Local>,

    /// When shutdown finished
    pub finished_at: DateTime<Local>,

    /// How capture ended; None if capture never ran
    pub capture_end: Option<CaptureEnd>,

    /// Finalized video artifact
    pub video_path: String,

    /// Frames written to the video artifact
    pub frames_written: u64,

    /// Capture rate derived from frame timestamps
    pub measured_fps: Option<f64>,

    /// Lines written to each RFID channel log, by channel id
    pub channel_lines: BTreeMap<String, u64>,

    /// Retimed artifact, if post-processing ran and succeeded
    pub post_processed: Option<String>,

    /// Post-processing failure, if any
    pub post_process_error: Option<ErrorReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let mut state = RecordingState::default();
        assert_eq!(state, RecordingState::Idle);

        state.transition(RecordingState::Recording).unwrap();
        state.transition(RecordingState::Finalizing).unwrap();
        state.transition(RecordingState::Done).unwrap();
        assert_eq!(state, RecordingState::Done);
    }

    #[test]
    fn test_no_return_to_recording() {
        let mut state = RecordingState::Finalizing;
        assert!(state.transition(RecordingState::Recording).is_err());
        assert_eq!(state, RecordingState::Finalizing);

        let mut state = RecordingState::Done;
        assert!(state.transition(RecordingState::Recording).is_err());
        assert!(state.transition(RecordingState::Finalizing).is_err());
    }

    #[test]
    fn test_idle_can_finalize_without_recording() {
        assert!(RecordingState::Idle.can_transition_to(RecordingState::Finalizing));
        assert!(!RecordingState::Idle.can_transition_to(RecordingState::Done));
    }

    #[test]
    fn test_capture_end_serializes_lowercase() {
        let json = serde_json::to_string(&CaptureEnd::Interrupted).unwrap();
        assert_eq!(json, "\"interrupted\"");
    }
}
