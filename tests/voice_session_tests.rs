// Integration tests for a full voice session over a websocket
//
// A local tokio-tungstenite server stands in for the voice service: it
// receives the uploaded utterance and answers with a transcript, reply text
// and a streamed audio response.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use voice_chat::audio::{AudioBackendConfig, AudioSource};
use voice_chat::protocol::{decode_frame, UploadMetadata};
use voice_chat::session::{Notification, Role, RuntimeOptions, SessionConfig, VoiceSession};
use voice_chat::ConnectionState;

/// 16kHz mono WAV: a 440Hz tone followed by digital silence
fn write_utterance(dir: &Path, tone_ms: u32, silence_ms: u32) -> Result<PathBuf> {
    let path = dir.join("utterance.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec)?;
    let tone_len = 16 * tone_ms;
    for i in 0..16 * (tone_ms + silence_ms) {
        let sample = if i < tone_len {
            ((i as f32 / 16000.0 * 440.0 * 2.0 * std::f32::consts::PI).sin() * 8000.0) as i16
        } else {
            0
        };
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(path)
}

/// Accept one connection, read one utterance and answer it
async fn fake_service(listener: TcpListener) -> Result<(UploadMetadata, Vec<u8>)> {
    let (stream, _) = listener.accept().await?;
    let mut ws = tokio_tungstenite::accept_async(stream).await?;

    let frame = loop {
        match ws.next().await {
            Some(Ok(Message::Binary(bytes))) => break bytes,
            Some(Ok(_)) => continue,
            other => anyhow::bail!("connection ended before an utterance: {:?}", other),
        }
    };
    let decoded = decode_frame(&frame)?;
    let metadata = decoded.metadata()?;
    let payload = decoded.payload.to_vec();

    for text in [
        r#"{"type":"transcript","text":"hello there"}"#,
        r#"{"type":"response_text","text":"Hi! How can I help?"}"#,
        r#"{"type":"audio_start"}"#,
    ] {
        ws.send(Message::Text(text.into())).await?;
    }
    ws.send(Message::Binary(b"ID3-part-1|".to_vec())).await?;
    ws.send(Message::Binary(b"part-2".to_vec())).await?;
    ws.send(Message::Text(r#"{"type":"audio_end"}"#.into())).await?;

    // Keep the connection up until the client closes it
    while let Some(Ok(message)) = ws.next().await {
        if message.is_close() {
            break;
        }
    }
    Ok((metadata, payload))
}

/// Accept one connection and count uploaded frames until it closes
async fn silent_service(listener: TcpListener) -> Result<usize> {
    let (stream, _) = listener.accept().await?;
    let mut ws = tokio_tungstenite::accept_async(stream).await?;

    let mut frames = 0;
    while let Some(Ok(message)) = ws.next().await {
        match message {
            Message::Binary(_) => frames += 1,
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(frames)
}

#[tokio::test]
async fn test_utterance_round_trip_over_websocket() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let input = write_utterance(temp_dir.path(), 600, 800)?;
    let playback_dir = temp_dir.path().join("responses");

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = tokio::spawn(fake_service(listener));

    let config = SessionConfig {
        session_id: "ws-1".to_string(),
        user_id: "u-1".to_string(),
        agent_id: "a-1".to_string(),
        api_key: Some("secret".to_string()),
        endpoint: format!("ws://{}/ws/listen_audio", addr),
        silence_flush: Duration::from_millis(100),
        auto_stop: Duration::from_secs(10),
        ..Default::default()
    };
    let options = RuntimeOptions {
        source: AudioSource::File {
            path: input,
            realtime: true,
        },
        backend: AudioBackendConfig::default(),
        playback_dir: playback_dir.clone(),
        ..Default::default()
    };

    let handle = VoiceSession::spawn(config, options)?;
    let mut notifications = handle.subscribe();
    handle.connect(None)?;

    let (transcript, reply) = timeout(Duration::from_secs(10), async {
        let mut transcript = None;
        loop {
            match notifications.recv().await? {
                Notification::Transcript(message) => transcript = Some(message),
                Notification::ResponseText(message) => {
                    return anyhow::Ok((transcript, message));
                }
                Notification::Error(e) => anyhow::bail!("session failed: {}", e),
                _ => {}
            }
        }
    })
    .await
    .context("no reply within 10s")??;

    let transcript = transcript.context("transcript arrives before the reply")?;
    assert_eq!(transcript.role, Role::User);
    assert_eq!(transcript.content, "hello there");
    assert_eq!(reply.content, "Hi! How can I help?");

    // Wait for the streamed response to be written out
    let mut snapshot = handle.snapshot().await?;
    for _ in 0..100 {
        if snapshot.stats.responses_played == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        snapshot = handle.snapshot().await?;
    }
    assert_eq!(snapshot.stats.responses_played, 1);
    assert_eq!(snapshot.stats.utterances_sent, 1);
    let roles: Vec<_> = snapshot.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);

    let response_path = playback_dir.join("ws-1-response-000.mp3");
    let mut saved = Vec::new();
    for _ in 0..100 {
        saved = tokio::fs::read(&response_path).await.unwrap_or_default();
        if saved.len() == 17 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(saved, b"ID3-part-1|part-2");

    handle.shutdown().await?;
    assert!(handle.is_closed());

    let (metadata, payload) = timeout(Duration::from_secs(5), server).await???;
    assert_eq!(metadata.session_id, "ws-1");
    assert_eq!(metadata.api_key, "secret");
    assert_eq!(metadata.audio_format, "audio/wav");
    assert_eq!(&payload[..4], b"RIFF");
    Ok(())
}

#[tokio::test]
async fn test_capture_ending_mid_speech_ends_session() -> Result<()> {
    let temp_dir = TempDir::new()?;
    // No trailing silence, so the speaker never stops
    let input = write_utterance(temp_dir.path(), 600, 0)?;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = tokio::spawn(silent_service(listener));

    let config = SessionConfig {
        session_id: "ws-2".to_string(),
        api_key: Some("secret".to_string()),
        endpoint: format!("ws://{}/ws/listen_audio", addr),
        silence_flush: Duration::from_millis(100),
        auto_stop: Duration::from_secs(3),
        ..Default::default()
    };
    let options = RuntimeOptions {
        source: AudioSource::File {
            path: input,
            realtime: false,
        },
        backend: AudioBackendConfig::default(),
        playback_dir: temp_dir.path().join("responses"),
        ..Default::default()
    };

    let handle = VoiceSession::spawn(config, options)?;
    let mut notifications = handle.subscribe();
    handle.connect(None)?;

    let errors = timeout(Duration::from_secs(5), async {
        let mut errors = 0;
        loop {
            match notifications.recv().await? {
                Notification::Error(_) => errors += 1,
                Notification::Connection(ConnectionState::Disconnected) => {
                    return anyhow::Ok(errors);
                }
                _ => {}
            }
        }
    })
    .await
    .context("session kept running after capture ended")??;
    assert_eq!(errors, 1);

    let snapshot = handle.snapshot().await?;
    assert!(!snapshot.stats.voice_active);
    assert_eq!(snapshot.stats.utterances_sent, 0);

    handle.shutdown().await?;
    let frames = timeout(Duration::from_secs(5), server).await???;
    assert_eq!(frames, 0);
    Ok(())
}
