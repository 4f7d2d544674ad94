use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::VadConfig;
use crate::protocol::UploadMetadata;

/// Default voice endpoint; the session id is appended as the last path segment
pub const DEFAULT_ENDPOINT: &str = "wss://agent-prod.studio.lyzr.ai/ws/listen_audio";

/// Configuration for one voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session identifier, part of the connection URL and of every frame
    pub session_id: String,

    pub user_id: String,

    pub agent_id: String,

    /// Pre-shared key; connecting is refused without one
    pub api_key: Option<String>,

    /// Ask the service to stream its reply
    pub streaming: bool,

    /// Base websocket URL
    pub endpoint: String,

    /// Silence after `stopped_speaking` before the utterance is sent
    pub silence_flush: Duration,

    /// Silence after `stopped_speaking` before voice mode shuts itself off
    pub auto_stop: Duration,

    /// Identical assistant replies inside this window are dropped
    pub duplicate_window: Duration,

    pub vad: VadConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("voice-{}", uuid::Uuid::new_v4()),
            user_id: String::new(),
            agent_id: String::new(),
            api_key: None,
            streaming: false,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            silence_flush: Duration::from_millis(1000),
            auto_stop: Duration::from_millis(30_000),
            duplicate_window: Duration::from_secs(2),
            vad: VadConfig::default(),
        }
    }
}

impl SessionConfig {
    /// `{endpoint}/{session_id}?x-api-key={key}`
    pub fn connection_url(&self) -> Option<String> {
        let key = self.api_key.as_deref()?;
        Some(format!(
            "{}/{}?x-api-key={}",
            self.endpoint.trim_end_matches('/'),
            urlencoding::encode(&self.session_id),
            urlencoding::encode(key)
        ))
    }

    /// Metadata attached to every uploaded utterance
    pub fn upload_metadata(&self, codec_label: &str) -> UploadMetadata {
        UploadMetadata {
            user_id: self.user_id.clone(),
            agent_id: self.agent_id.clone(),
            session_id: self.session_id.clone(),
            audio_format: codec_label.to_string(),
            api_key: self.api_key.clone().unwrap_or_default(),
            is_streaming: self.streaming,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_url_encodes_key() {
        let config = SessionConfig {
            session_id: "s-1".to_string(),
            api_key: Some("a b&c".to_string()),
            endpoint: "wss://example.test/ws/listen_audio/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.connection_url().as_deref(),
            Some("wss://example.test/ws/listen_audio/s-1?x-api-key=a%20b%26c")
        );
    }

    #[test]
    fn test_connection_url_encodes_session_id() {
        let config = SessionConfig {
            session_id: "team/a?b#c".to_string(),
            api_key: Some("k".to_string()),
            endpoint: "wss://example.test/ws/listen_audio".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.connection_url().as_deref(),
            Some("wss://example.test/ws/listen_audio/team%2Fa%3Fb%23c?x-api-key=k")
        );
    }

    #[test]
    fn test_no_url_without_key() {
        assert!(SessionConfig::default().connection_url().is_none());
    }
}
