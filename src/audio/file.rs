use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame, StreamFormat};

/// A fully decoded audio file (16-bit PCM, interleaved)
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    /// Decode any container/codec symphonia understands (WAV, MP3, FLAC, OGG, M4A)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .context("Unsupported audio format")?;
        let mut format = probed.format;

        let codec_params = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .map(|t| (t.id, t.codec_params.clone()))
            .context("No decodable audio track")?;
        let (track_id, codec_params) = codec_params;

        let sample_rate = codec_params
            .sample_rate
            .context("Audio track has no sample rate")?;
        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(1);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .context("Failed to create decoder")?;

        let mut samples: Vec<i16> = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(e).context("Failed to read audio packet"),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let mut buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping undecodable packet: {}", e);
                }
                Err(e) => return Err(e).context("Failed to decode audio"),
            }
        }

        let duration_seconds =
            samples.len() as f64 / (sample_rate as f64 * channels.max(1) as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            sample_rate,
            channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate,
            channels,
            samples,
        })
    }

    /// Convert to the capture format expected downstream (mono, decimated)
    pub fn conform(&self, target_sample_rate: u32, target_channels: u16) -> Vec<i16> {
        let mut samples = self.samples.clone();
        let mut channels = self.channels;

        if channels == 2 && target_channels == 1 {
            samples = stereo_to_mono(&samples);
            channels = 1;
        }

        if channels == 1 && self.sample_rate > target_sample_rate {
            let ratio = (self.sample_rate / target_sample_rate).max(1) as usize;
            samples = samples.into_iter().step_by(ratio).collect();
        }

        samples
    }

    /// Sample rate after `conform`
    pub fn conformed_rate(&self, target_sample_rate: u32, target_channels: u16) -> u32 {
        let mono = self.channels == 1 || (self.channels == 2 && target_channels == 1);
        if mono && self.sample_rate > target_sample_rate {
            self.sample_rate / (self.sample_rate / target_sample_rate).max(1)
        } else {
            self.sample_rate
        }
    }
}

/// Average left and right channels
fn stereo_to_mono(samples: &[i16]) -> Vec<i16> {
    samples
        .chunks_exact(2)
        .map(|pair| ((pair[0] as i32 + pair[1] as i32) / 2) as i16)
        .collect()
}

/// Capture backend that plays an audio file as if it were a microphone
pub struct FileBackend {
    path: PathBuf,
    config: AudioBackendConfig,
    realtime: bool,
    pump: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn new(path: PathBuf, config: AudioBackendConfig, realtime: bool) -> Self {
        Self {
            path,
            config,
            realtime,
            pump: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<(StreamFormat, mpsc::Receiver<AudioFrame>)> {
        if self.config.target_sample_rate == 0 {
            anyhow::bail!("Target sample rate must be greater than zero");
        }

        let path = self.path.clone();
        let audio = tokio::task::spawn_blocking(move || AudioFile::open(path))
            .await
            .context("Audio decode task panicked")??;

        let channels = if audio.channels == 2 && self.config.target_channels == 1 {
            1
        } else {
            audio.channels
        };
        let format = StreamFormat {
            sample_rate: audio.conformed_rate(self.config.target_sample_rate, self.config.target_channels),
            channels,
        };
        let samples = audio.conform(self.config.target_sample_rate, self.config.target_channels);

        let frame_len = (format.sample_rate as u64 * self.config.buffer_duration_ms / 1000)
            as usize
            * format.channels as usize;
        let frame_len = frame_len.max(1);
        let frame_ms = self.config.buffer_duration_ms;
        let realtime = self.realtime;

        let (tx, rx) = mpsc::channel(64);
        self.pump = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(frame_ms.max(1)));
            let mut index = 0u64;
            for chunk in samples.chunks(frame_len) {
                if realtime {
                    ticker.tick().await;
                }
                let frame = AudioFrame {
                    samples: chunk.to_vec(),
                    sample_rate: format.sample_rate,
                    channels: format.channels,
                    timestamp_ms: index * frame_ms,
                };
                if tx.send(frame).await.is_err() {
                    return;
                }
                index += 1;
            }
            debug!("File capture exhausted after {} frames", index);

            // A live device keeps delivering (silent) audio until released
            if realtime {
                loop {
                    ticker.tick().await;
                    let frame = AudioFrame {
                        samples: vec![0; frame_len],
                        sample_rate: format.sample_rate,
                        channels: format.channels,
                        timestamp_ms: index * frame_ms,
                    };
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                    index += 1;
                }
            }
        }));

        info!("File capture started: {}", self.path.display());
        Ok((format, rx))
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(pump) = self.pump.take() {
            pump.abort();
            info!("File capture stopped: {}", self.path.display());
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.pump.as_ref().is_some_and(|p| !p.is_finished())
    }

    fn name(&self) -> &str {
        "file"
    }
}
