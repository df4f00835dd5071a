//! Events emitted by the session driver
//!
//! Broadcast to IPC subscribers so a UI can show the live transcript and
//! refresh its lists when an entry is filed.

use serde::{Deserialize, Serialize};

use crate::grammar::Intent;
use crate::session::FinalizeReason;

/// Session lifecycle events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Recognizer started, recording in progress
    RecordingStarted,

    /// New best transcription while recording
    TranscriptUpdated { text: String },

    /// A finalize trigger ended the recording
    Finalizing { reason: FinalizeReason },

    /// Classified entry appended to its list
    EntrySaved { intent: Intent, text: String },

    /// Recording produced nothing to file
    SessionFailed {
        reason: Option<FinalizeReason>,
        /// Stable error code, as in IPC error responses
        error: String,
    },

    /// Session is idle again
    SessionReset,
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::RecordingStarted => write!(f, "RECORDING_STARTED"),
            SessionEvent::TranscriptUpdated { text } => {
                write!(f, "TRANSCRIPT_UPDATED ({} chars)", text.chars().count())
            }
            SessionEvent::Finalizing { reason } => write!(f, "FINALIZING ({})", reason),
            SessionEvent::EntrySaved { intent, .. } => write!(f, "ENTRY_SAVED ({})", intent),
            SessionEvent::SessionFailed { error, .. } => write!(f, "SESSION_FAILED ({})", error),
            SessionEvent::SessionReset => write!(f, "SESSION_RESET"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = SessionEvent::EntrySaved {
            intent: Intent::Reminder,
            text: "call mom".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("entry_saved"));
        assert!(json.contains("\"intent\":\"reminder\""));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"finalizing","reason":"timeout"}"#;
        let event: SessionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            SessionEvent::Finalizing {
                reason: FinalizeReason::Timeout
            }
        );
    }

    #[test]
    fn test_display() {
        let event = SessionEvent::TranscriptUpdated {
            text: "note".to_string(),
        };
        assert_eq!(event.to_string(), "TRANSCRIPT_UPDATED (4 chars)");
    }
}
