pub mod backend;
pub mod file;
pub mod recorder;
pub mod vad;

pub use backend::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource, DeviceError,
    StreamFormat,
};
pub use file::{AudioFile, FileBackend};
pub use recorder::{
    ChunkEncoder, CompletedUtterance, Disposition, EncoderOutput, UtteranceRecorder,
    WavChunkEncoder,
};
pub use vad::{EnergyVad, VadConfig, VadEdge};
