use anyhow::{Context, Result};
use std::io::Cursor;
use tracing::{debug, info, warn};

use super::backend::{AudioFrame, StreamFormat};

/// What happens to an utterance once its recorder stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Send,
    Discard,
}

/// Output reported by an encoder after `stop`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderOutput {
    /// Encoded bytes of the flushed chunk
    Data(Vec<u8>),
    /// The encoder is idle again
    Stopped,
}

/// Chunked encoder used by the utterance recorder
///
/// `stop` must not report synchronously: completion is delivered later as
/// `EncoderOutput::Data` (zero or more) followed by one `EncoderOutput::Stopped`.
pub trait ChunkEncoder: Send {
    /// Container/codec label carried in upload metadata
    fn codec_label(&self) -> &str;

    /// Begin a new chunk for the given stream
    fn start(&mut self, format: StreamFormat) -> Result<()>;

    /// Feed captured audio into the current chunk
    fn push(&mut self, frame: &AudioFrame);

    /// Flush the current chunk
    fn stop(&mut self);
}

/// Encoder producing one in-memory WAV file per chunk
pub struct WavChunkEncoder {
    label: String,
    format: Option<StreamFormat>,
    samples: Vec<i16>,
    output: Box<dyn FnMut(EncoderOutput) + Send>,
}

impl WavChunkEncoder {
    pub fn new(label: impl Into<String>, output: Box<dyn FnMut(EncoderOutput) + Send>) -> Self {
        Self {
            label: label.into(),
            format: None,
            samples: Vec::new(),
            output,
        }
    }

    fn encode(format: StreamFormat, samples: &[i16]) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .context("Failed to create WAV writer")?;
            for &sample in samples {
                writer
                    .write_sample(sample)
                    .context("Failed to write sample to WAV")?;
            }
            writer.finalize().context("Failed to finalize WAV chunk")?;
        }
        Ok(cursor.into_inner())
    }
}

impl ChunkEncoder for WavChunkEncoder {
    fn codec_label(&self) -> &str {
        &self.label
    }

    fn start(&mut self, format: StreamFormat) -> Result<()> {
        self.format = Some(format);
        self.samples.clear();
        Ok(())
    }

    fn push(&mut self, frame: &AudioFrame) {
        if self.format.is_some() {
            self.samples.extend_from_slice(&frame.samples);
        }
    }

    fn stop(&mut self) {
        let samples = std::mem::take(&mut self.samples);
        if let Some(format) = self.format.take() {
            if !samples.is_empty() {
                match Self::encode(format, &samples) {
                    Ok(bytes) => (self.output)(EncoderOutput::Data(bytes)),
                    Err(e) => warn!("Dropping chunk that failed to encode: {:#}", e),
                }
            }
        }
        (self.output)(EncoderOutput::Stopped);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecorderState {
    Idle,
    Recording { utterance: u64 },
    Stopping { utterance: u64, disposition: Disposition },
}

/// An utterance whose recorder has fully stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedUtterance {
    pub id: u64,
    pub disposition: Disposition,
    pub bytes: Vec<u8>,
}

/// Records one utterance at a time on a bound capture stream
pub struct UtteranceRecorder {
    encoder: Box<dyn ChunkEncoder>,
    state: RecorderState,
    stream: Option<StreamFormat>,
    buffered: Vec<u8>,
    next_utterance: u64,
}

impl UtteranceRecorder {
    pub fn new(encoder: Box<dyn ChunkEncoder>) -> Self {
        Self {
            encoder,
            state: RecorderState::Idle,
            stream: None,
            buffered: Vec::new(),
            next_utterance: 0,
        }
    }

    pub fn codec_label(&self) -> &str {
        self.encoder.codec_label()
    }

    /// Attach the capture stream the recorder records from
    pub fn bind(&mut self, stream: StreamFormat) {
        self.stream = Some(stream);
    }

    /// Forget the capture stream; later `start` calls are refused
    pub fn unbind(&mut self) {
        self.stream = None;
    }

    pub fn is_bound(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_idle(&self) -> bool {
        self.state == RecorderState::Idle
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, RecorderState::Recording { .. })
    }

    pub fn is_stopping(&self) -> bool {
        matches!(self.state, RecorderState::Stopping { .. })
    }

    /// Start a new utterance; only valid when idle and bound
    pub fn start(&mut self) -> Result<u64> {
        let stream = self.stream.context("Recorder has no capture stream")?;
        if !self.is_idle() {
            anyhow::bail!("Recorder is busy ({:?})", self.state);
        }

        self.encoder.start(stream)?;
        let utterance = self.next_utterance;
        self.next_utterance += 1;
        self.buffered.clear();
        self.state = RecorderState::Recording { utterance };
        debug!("Utterance {} recording", utterance);
        Ok(utterance)
    }

    /// Stop the current utterance with the given disposition
    ///
    /// Returns false when nothing was recording. A pending stop may only be
    /// downgraded to `Discard`.
    pub fn stop(&mut self, disposition: Disposition) -> bool {
        match self.state {
            RecorderState::Recording { utterance } => {
                self.state = RecorderState::Stopping {
                    utterance,
                    disposition,
                };
                info!("Stopping utterance {} ({:?})", utterance, disposition);
                self.encoder.stop();
                true
            }
            RecorderState::Stopping { utterance, .. } if disposition == Disposition::Discard => {
                self.state = RecorderState::Stopping {
                    utterance,
                    disposition,
                };
                false
            }
            _ => false,
        }
    }

    pub fn push(&mut self, frame: &AudioFrame) {
        if self.is_recording() {
            self.encoder.push(frame);
        }
    }

    /// Encoder delivered flushed bytes
    pub fn on_data(&mut self, bytes: Vec<u8>) {
        match self.state {
            RecorderState::Stopping { .. } | RecorderState::Recording { .. } => {
                self.buffered.extend_from_slice(&bytes);
            }
            RecorderState::Idle => debug!("Discarded stale chunk of {} bytes", bytes.len()),
        }
    }

    /// Encoder finished; yields the completed utterance
    pub fn on_stopped(&mut self) -> Option<CompletedUtterance> {
        match self.state {
            RecorderState::Stopping {
                utterance,
                disposition,
            } => {
                self.state = RecorderState::Idle;
                Some(CompletedUtterance {
                    id: utterance,
                    disposition,
                    bytes: std::mem::take(&mut self.buffered),
                })
            }
            _ => {
                debug!("Ignoring stop completion while {:?}", self.state);
                None
            }
        }
    }
}
