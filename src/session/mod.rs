//! Voice session management
//!
//! This module provides the voice session that ties together:
//! - Capture device acquisition and VAD-driven utterance recording
//! - Silence flush and auto-stop timers
//! - Framed uploads over the websocket channel
//! - Transcript/response conversation state
//! - Streamed playback of response audio

mod config;
mod controller;
mod conversation;
mod runtime;
mod stats;
mod timers;

pub use config::{SessionConfig, DEFAULT_ENDPOINT};
pub use controller::{
    CaptureDevice, Collaborators, Notification, SessionController, SessionEvent, SessionObserver,
};
pub use conversation::{ChatMessage, Conversation, Role, PLACEHOLDER_TEXT};
pub use runtime::{RuntimeOptions, SessionSnapshot, VoiceSession, VoiceSessionHandle};
pub use stats::{SessionStats, SpeechState};
pub use timers::{Scheduler, TimerEmitter, TimerHandle, TokioScheduler};
