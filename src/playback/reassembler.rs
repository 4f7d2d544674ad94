use anyhow::Result;
use std::collections::VecDeque;
use tracing::{debug, error, info, warn};

/// Identifier of one streamed audio response
pub type StreamId = u64;

/// Streaming consumer of one audio response
///
/// `append` returns immediately; the sink reports completion of each append
/// out of band (`SessionEvent::SinkAppended(stream)`).
pub trait AudioSink: Send {
    fn append(&mut self, bytes: Vec<u8>);
    fn finalize(self: Box<Self>);
    fn abandon(self: Box<Self>);
}

/// Opens a fresh sink per response stream
pub trait SinkFactory: Send {
    fn open(&mut self, stream: StreamId) -> Result<Box<dyn AudioSink>>;
}

struct OpenStream {
    id: StreamId,
    sink: Box<dyn AudioSink>,
    queue: VecDeque<Vec<u8>>,
    in_flight: bool,
    ending: bool,
    appended: usize,
}

/// Feeds inbound audio chunks to a sink one append at a time
pub struct PlaybackReassembler {
    factory: Box<dyn SinkFactory>,
    current: Option<OpenStream>,
    next_stream: StreamId,
    completed: usize,
}

impl PlaybackReassembler {
    pub fn new(factory: Box<dyn SinkFactory>) -> Self {
        Self {
            factory,
            current: None,
            next_stream: 0,
            completed: 0,
        }
    }

    /// Number of responses fully drained and finalized
    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Chunks waiting behind the in-flight append
    pub fn queued(&self) -> usize {
        self.current.as_ref().map_or(0, |s| s.queue.len())
    }

    pub fn append_in_flight(&self) -> bool {
        self.current.as_ref().is_some_and(|s| s.in_flight)
    }

    pub fn on_audio_start(&mut self) {
        if let Some(prev) = self.current.take() {
            warn!(
                "Protocol violation: audio_start while response {} still open, abandoning it",
                prev.id
            );
            prev.sink.abandon();
        }

        let id = self.next_stream;
        self.next_stream += 1;

        match self.factory.open(id) {
            Ok(sink) => {
                info!("Audio response {} started", id);
                self.current = Some(OpenStream {
                    id,
                    sink,
                    queue: VecDeque::new(),
                    in_flight: false,
                    ending: false,
                    appended: 0,
                });
            }
            Err(e) => error!("Failed to open sink for response {}: {:#}", id, e),
        }
    }

    pub fn on_chunk(&mut self, bytes: Vec<u8>) {
        match self.current.as_mut() {
            Some(stream) if !stream.ending => {
                stream.queue.push_back(bytes);
                self.drain();
            }
            Some(stream) => {
                warn!("Discarding {} bytes after audio_end of response {}", bytes.len(), stream.id)
            }
            None => debug!("Discarding {} bytes with no open response", bytes.len()),
        }
    }

    pub fn on_audio_end(&mut self) {
        match self.current.as_mut() {
            Some(stream) => {
                stream.ending = true;
                self.drain();
            }
            None => debug!("audio_end with no open response"),
        }
    }

    /// The sink finished the in-flight append of `stream`
    pub fn on_append_complete(&mut self, stream: StreamId) {
        match self.current.as_mut() {
            Some(open) if open.id == stream && open.in_flight => {
                open.in_flight = false;
                self.drain();
            }
            _ => debug!("Ignoring append completion for stream {}", stream),
        }
    }

    /// Drop the open response without finalizing it
    pub fn abandon(&mut self) {
        if let Some(stream) = self.current.take() {
            info!(
                "Abandoning response {} ({} queued chunks)",
                stream.id,
                stream.queue.len()
            );
            stream.sink.abandon();
        }
    }

    fn drain(&mut self) {
        let Some(stream) = self.current.as_mut() else {
            return;
        };
        if stream.in_flight {
            return;
        }

        if let Some(chunk) = stream.queue.pop_front() {
            stream.in_flight = true;
            stream.appended += 1;
            stream.sink.append(chunk);
            return;
        }

        if stream.ending {
            if let Some(stream) = self.current.take() {
                info!(
                    "Audio response {} complete ({} chunks)",
                    stream.id, stream.appended
                );
                stream.sink.finalize();
                self.completed += 1;
            }
        }
    }
}
