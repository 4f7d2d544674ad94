use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::{AudioBackendConfig, AudioSource, VadConfig};
use crate::session::{RuntimeOptions, SessionConfig, DEFAULT_ENDPOINT};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub session: SessionDefaults,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub timers: TimerConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub url: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

/// Identity attached to every session
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionDefaults {
    pub user_id: String,
    pub agent_id: String,
    pub api_key: Option<String>,
    pub streaming: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub silence_flush_ms: u64,
    pub auto_stop_ms: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            silence_flush_ms: 1000,
            auto_stop_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub codec_label: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            codec_label: "audio/wav".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub output_dir: PathBuf,
    /// Extension of saved response files
    pub extension: String,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./responses"),
            extension: "mp3".to_string(),
        }
    }
}

impl Config {
    /// Load `path` (any format the `config` crate knows) with
    /// `VOICE_CHAT__SECTION__KEY` environment overrides on top
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("VOICE_CHAT")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path))?;

        let config: Self = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            anyhow::bail!("audio.sample_rate must be greater than zero");
        }
        if self.audio.channels == 0 {
            anyhow::bail!("audio.channels must be greater than zero");
        }
        if self.vad.window_ms == 0 {
            anyhow::bail!("vad.window_ms must be greater than zero");
        }
        Ok(())
    }

    /// Per-session settings for a new session (fresh id unless given)
    pub fn session_config(&self, session_id: Option<String>) -> SessionConfig {
        let defaults = SessionConfig::default();
        SessionConfig {
            session_id: session_id.unwrap_or(defaults.session_id),
            user_id: self.session.user_id.clone(),
            agent_id: self.session.agent_id.clone(),
            api_key: self.session.api_key.clone().filter(|k| !k.is_empty()),
            streaming: self.session.streaming,
            endpoint: self.endpoint.url.clone(),
            silence_flush: Duration::from_millis(self.timers.silence_flush_ms),
            auto_stop: Duration::from_millis(self.timers.auto_stop_ms),
            duplicate_window: defaults.duplicate_window,
            vad: self.vad.clone(),
        }
    }

    pub fn backend_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            target_sample_rate: self.audio.sample_rate,
            target_channels: self.audio.channels,
            buffer_duration_ms: self.vad.window_ms as u64,
        }
    }

    pub fn runtime_options(&self, source: AudioSource) -> RuntimeOptions {
        RuntimeOptions {
            source,
            backend: self.backend_config(),
            codec_label: self.audio.codec_label.clone(),
            playback_dir: self.playback.output_dir.clone(),
            playback_extension: self.playback.extension.clone(),
            ..Default::default()
        }
    }
}
