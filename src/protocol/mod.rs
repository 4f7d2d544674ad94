//! Wire contract with the voice service

pub mod frame;
pub mod messages;

pub use frame::{decode_frame, encode_frame, DecodedFrame, FrameError, UploadMetadata};
pub use messages::{parse_text, InboundEvent, ProtocolError};
