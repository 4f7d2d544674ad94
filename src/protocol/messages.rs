use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// A typed inbound message from the voice service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Recognized text of the last uploaded utterance; empty means nothing was heard
    Transcript { text: String },
    /// Assistant reply text (delta or completion)
    ResponseText { text: String },
    /// A synthesized audio response begins
    AudioStart,
    /// One chunk of the currently open audio response
    AudioChunk { bytes: Vec<u8> },
    /// The current audio response is complete
    AudioEnd,
    /// Error reported by the peer; the connection stays open
    Error { message: String },
}

/// Inbound text message that could not be turned into an event
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message is not JSON: {0}")]
    NotJson(#[from] serde_json::Error),

    #[error("message has no \"type\" discriminator")]
    MissingType,

    #[error("unrecognized message type {0:?}")]
    UnknownType(String),

    #[error("{0} message carries no text")]
    MissingText(&'static str),
}

#[derive(Debug, Deserialize)]
struct TextEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Parse one inbound text message
pub fn parse_text(raw: &str) -> Result<InboundEvent, ProtocolError> {
    let envelope: TextEnvelope = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            // Plain-text error lines are sent outside the JSON envelope
            if raw.to_ascii_lowercase().contains("error") {
                return Ok(InboundEvent::Error {
                    message: raw.trim().to_string(),
                });
            }
            return Err(ProtocolError::NotJson(e));
        }
    };

    let reported = envelope.error.as_ref().filter(|v| !v.is_null());
    if envelope.kind.as_deref() == Some("error") || reported.is_some() {
        let message = match reported {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => envelope
                .message
                .or(envelope.text)
                .unwrap_or_else(|| raw.to_string()),
        };
        return Ok(InboundEvent::Error { message });
    }

    match envelope.kind.as_deref() {
        Some("transcript") => Ok(InboundEvent::Transcript {
            text: envelope.text.unwrap_or_default(),
        }),
        Some("response_text") => envelope
            .text
            .map(|text| InboundEvent::ResponseText { text })
            .ok_or(ProtocolError::MissingText("response_text")),
        Some("audio_start") => Ok(InboundEvent::AudioStart),
        Some("audio_end") => Ok(InboundEvent::AudioEnd),
        Some(other) => Err(ProtocolError::UnknownType(other.to_string())),
        None => Err(ProtocolError::MissingType),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_without_text_is_empty() {
        let event = parse_text(r#"{"type":"transcript"}"#).unwrap();
        assert_eq!(event, InboundEvent::Transcript { text: String::new() });
    }

    #[test]
    fn test_error_field_wins_over_type() {
        let event = parse_text(r#"{"type":"transcript","error":"quota exceeded"}"#).unwrap();
        assert_eq!(
            event,
            InboundEvent::Error {
                message: "quota exceeded".to_string()
            }
        );
    }

    #[test]
    fn test_plain_text_error_line() {
        let event = parse_text("ERROR: invalid api key").unwrap();
        assert_eq!(
            event,
            InboundEvent::Error {
                message: "ERROR: invalid api key".to_string()
            }
        );
    }

    #[test]
    fn test_transcript_mentioning_error_is_still_a_transcript() {
        let event = parse_text(r#"{"type":"transcript","text":"there was an error"}"#).unwrap();
        assert!(matches!(event, InboundEvent::Transcript { .. }));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(parse_text("hello"), Err(ProtocolError::NotJson(_))));
        assert!(matches!(parse_text("{}"), Err(ProtocolError::MissingType)));
        assert!(matches!(
            parse_text(r#"{"type":"ping"}"#),
            Err(ProtocolError::UnknownType(t)) if t == "ping"
        ));
        assert!(matches!(
            parse_text(r#"{"type":"response_text"}"#),
            Err(ProtocolError::MissingText("response_text"))
        ));
    }
}
