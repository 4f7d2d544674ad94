pub mod audio;
pub mod channel;
pub mod config;
pub mod http;
pub mod playback;
pub mod protocol;
pub mod session;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioSource,
    EnergyVad, VadConfig, VadEdge,
};
pub use channel::{ConnectionState, SocketChannel, WsTransport};
pub use config::Config;
pub use http::{create_router, AppState};
pub use protocol::{decode_frame, encode_frame, parse_text, InboundEvent, UploadMetadata};
pub use session::{
    Notification, RuntimeOptions, SessionConfig, SessionController, SessionEvent, SessionSnapshot,
    SessionStats, VoiceSession, VoiceSessionHandle,
};
