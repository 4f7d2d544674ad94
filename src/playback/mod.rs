//! Streamed response audio

pub mod file_sink;
pub mod reassembler;

pub use file_sink::{AppendEmitter, FileSinkFactory};
pub use reassembler::{AudioSink, PlaybackReassembler, SinkFactory, StreamId};
