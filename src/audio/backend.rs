use anyhow::Result;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;

use super::file::FileBackend;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Duration covered by this frame in milliseconds
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let per_channel = self.samples.len() as u64 / self.channels as u64;
        per_channel * 1000 / self.sample_rate as u64
    }
}

/// Format of a live capture stream, handed to the encoder when a recorder starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate (will resample if needed)
    pub target_sample_rate: u32,
    /// Target channel count (1 = mono, 2 = stereo)
    pub target_channels: u16,
    /// Buffer size in milliseconds (affects latency)
    pub buffer_duration_ms: u64,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000,
            target_channels: 1,
            buffer_duration_ms: 40, // one VAD window per frame
        }
    }
}

/// Capture device failures; each ends the voice session
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no microphone backend is compiled into this build")]
    NoMicrophone,

    #[error("capture device unavailable: {0}")]
    Denied(String),

    #[error("capture device lost: {0}")]
    Lost(String),
}

/// Audio capture backend trait
///
/// A backend is the capture device: `start` acquires it and yields frames
/// until `stop` releases it. Acquisition failures are device errors and end
/// the voice session.
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Acquire the device and start capturing
    ///
    /// Returns the stream format and a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<(StreamFormat, mpsc::Receiver<AudioFrame>)>;

    /// Stop capturing and release the device
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create audio backend based on configuration
    pub fn create(
        source: AudioSource,
        config: AudioBackendConfig,
    ) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::File { path, realtime } => {
                Ok(Box::new(FileBackend::new(path, config, realtime)))
            }

            AudioSource::Microphone => Err(DeviceError::NoMicrophone.into()),
        }
    }
}

/// Audio source type
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Microphone input (platform backend, not bundled)
    Microphone,
    /// File input, played back as if it were a live microphone
    File { path: PathBuf, realtime: bool },
}
