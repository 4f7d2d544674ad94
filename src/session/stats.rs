use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::channel::ConnectionState;

/// Speech state derived from VAD edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechState {
    Silent,
    Speaking,
}

/// Statistics about a voice session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: String,

    pub connection: ConnectionState,

    /// Whether voice mode (capture + VAD) is running
    pub voice_active: bool,

    pub speech: SpeechState,

    /// Utterances framed and handed to the socket
    pub utterances_sent: usize,

    /// Utterances dropped (discard disposition or no audio)
    pub utterances_discarded: usize,

    /// Frames the socket refused because it was not connected
    pub frames_rejected: usize,

    /// Audio responses fully played into a sink
    pub responses_played: usize,

    /// When the session was created
    pub started_at: DateTime<Utc>,

    /// Session age in seconds
    pub duration_secs: f64,
}
