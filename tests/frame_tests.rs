// Integration tests for the upload frame codec
//
// These tests verify the length-prefixed metadata + payload layout that
// every uploaded utterance uses on the wire.

use anyhow::Result;
use voice_chat::protocol::{decode_frame, encode_frame, frame::encode_raw, FrameError, UploadMetadata};

fn metadata() -> UploadMetadata {
    UploadMetadata {
        user_id: "user@example.com".to_string(),
        agent_id: "agent-42".to_string(),
        session_id: "voice-sessión-1".to_string(),
        audio_format: "audio/wav".to_string(),
        api_key: "sk-test".to_string(),
        is_streaming: true,
    }
}

#[test]
fn test_frame_round_trip() -> Result<()> {
    let meta = metadata();
    let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

    let frame = encode_frame(&meta, &payload)?;
    let decoded = decode_frame(&frame)?;

    assert_eq!(decoded.metadata_json, serde_json::to_vec(&meta)?.as_slice());
    assert_eq!(decoded.metadata()?, meta);
    assert_eq!(decoded.payload, payload.as_slice());
    Ok(())
}

#[test]
fn test_length_prefix_counts_utf8_bytes() -> Result<()> {
    let meta = metadata();
    let json = serde_json::to_vec(&meta)?;
    let frame = encode_frame(&meta, b"abc")?;

    let declared = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    assert_eq!(declared, json.len());
    assert_eq!(frame.len(), 4 + json.len() + 3);
    Ok(())
}

#[test]
fn test_metadata_uses_wire_key_names() -> Result<()> {
    let frame = encode_frame(&metadata(), &[])?;
    let decoded = decode_frame(&frame)?;
    let value: serde_json::Value = serde_json::from_slice(decoded.metadata_json)?;

    for key in ["user_id", "agent_id", "session_id", "audio_format", "x-api-key", "is_streaming"] {
        assert!(value.get(key).is_some(), "missing {}", key);
    }
    assert_eq!(value["x-api-key"], "sk-test");
    assert!(decoded.payload.is_empty());
    Ok(())
}

#[test]
fn test_truncated_header_is_rejected() {
    assert!(matches!(decode_frame(&[1, 0]), Err(FrameError::Truncated(2))));
}

#[test]
fn test_length_overrun_is_rejected() -> Result<()> {
    let mut frame = encode_raw(b"{}", b"")?;
    frame[0] = 200;
    match decode_frame(&frame) {
        Err(FrameError::LengthOverrun {
            declared,
            available,
        }) => {
            assert_eq!(declared, 200);
            assert_eq!(available, 2);
        }
        other => panic!("unexpected result {:?}", other),
    }
    Ok(())
}

#[test]
fn test_invalid_metadata_json_is_reported() -> Result<()> {
    let frame = encode_raw(b"not json", b"payload")?;
    let decoded = decode_frame(&frame)?;
    assert_eq!(decoded.payload, b"payload");
    assert!(matches!(decoded.metadata(), Err(FrameError::Json(_))));
    Ok(())
}
