//! Upload frame codec
//!
//! One utterance travels as one binary websocket message:
//!
//! ```text
//! [u32 LE metadata length N][N bytes UTF-8 JSON metadata][audio payload ...]
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of the little-endian length prefix
pub const HEADER_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame shorter than the 4-byte header ({0} bytes)")]
    Truncated(usize),

    #[error("metadata length {declared} exceeds frame body of {available} bytes")]
    LengthOverrun { declared: usize, available: usize },

    #[error("metadata of {0} bytes does not fit a u32 length prefix")]
    MetadataTooLarge(usize),

    #[error("metadata is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("metadata is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Fixed per-session metadata sent with every utterance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub user_id: String,
    pub agent_id: String,
    pub session_id: String,
    /// Codec/container label of the payload (e.g. "audio/wav")
    pub audio_format: String,
    #[serde(rename = "x-api-key")]
    pub api_key: String,
    pub is_streaming: bool,
}

/// Serialize metadata and payload into one wire frame
pub fn encode_frame(metadata: &UploadMetadata, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let meta = serde_json::to_vec(metadata)?;
    encode_raw(&meta, payload)
}

/// Frame already-serialized metadata bytes
pub fn encode_raw(metadata_json: &[u8], payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = u32::try_from(metadata_json.len())
        .map_err(|_| FrameError::MetadataTooLarge(metadata_json.len()))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + metadata_json.len() + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(metadata_json);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// A frame split back into its parts, borrowing from the wire bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame<'a> {
    pub metadata_json: &'a [u8],
    pub payload: &'a [u8],
}

impl DecodedFrame<'_> {
    pub fn metadata(&self) -> Result<UploadMetadata, FrameError> {
        let text = std::str::from_utf8(self.metadata_json)?;
        Ok(serde_json::from_str(text)?)
    }
}

/// Split a wire frame into metadata and payload
pub fn decode_frame(frame: &[u8]) -> Result<DecodedFrame<'_>, FrameError> {
    if frame.len() < HEADER_LEN {
        return Err(FrameError::Truncated(frame.len()));
    }

    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&frame[..HEADER_LEN]);
    let declared = u32::from_le_bytes(header) as usize;

    let body = &frame[HEADER_LEN..];
    if declared > body.len() {
        return Err(FrameError::LengthOverrun {
            declared,
            available: body.len(),
        });
    }

    let (metadata_json, payload) = body.split_at(declared);
    Ok(DecodedFrame {
        metadata_json,
        payload,
    })
}
