//! Event types broadcast by the engine to UI/shell subscribers.
//!
//! All types derive serde with camelCase fields so a frontend can consume
//! them as JSON unchanged.

use serde::{Deserialize, Serialize};

/// Current state of a revoice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Engine created but not capturing.
    Idle,
    /// Capturing, waiting for voice onset (automatic mode).
    Listening,
    /// An utterance is being accumulated.
    Recording,
    /// A segment is at the conversion service.
    Converting,
    /// Converted audio is streaming to the output device.
    Playing,
    /// Capture stopped; session may be restarted.
    Stopped,
    /// Unrecoverable error — restart required.
    Error,
}

/// Emitted whenever the session status changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Emitted for each processed frame: live level metering for the shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Root-mean-square level of the frame in [0.0, 1.0].
    pub rms: f32,
    /// Whether the VAD classified the frame as speech.
    pub is_speech: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_lowercase() {
        let event = SessionStatusEvent {
            status: SessionStatus::Converting,
            detail: Some("segment 12".into()),
        };
        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "converting");
        assert_eq!(json["detail"], "segment 12");

        let round_trip: SessionStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.status, SessionStatus::Converting);
    }

    #[test]
    fn activity_event_uses_camel_case() {
        let event = ActivityEvent {
            seq: 3,
            rms: 0.18,
            is_speech: true,
        };
        let json = serde_json::to_value(&event).expect("serialize activity event");
        assert_eq!(json["seq"], 3);
        assert_eq!(json["isSpeech"], true);
    }

    #[test]
    fn status_rejects_non_lowercase_values() {
        let err = serde_json::from_str::<SessionStatus>(r#""Listening""#);
        assert!(err.is_err());
    }
}
