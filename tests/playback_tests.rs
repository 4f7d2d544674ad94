// Integration tests for response playback
//
// These tests run the reassembler against the file sink and verify that
// streamed response audio lands on disk in arrival order.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use voice_chat::playback::{FileSinkFactory, PlaybackReassembler, StreamId};

fn factory(dir: &Path) -> Result<(FileSinkFactory, mpsc::UnboundedReceiver<StreamId>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let factory = FileSinkFactory::new(
        dir,
        "s-1",
        "mp3",
        Arc::new(move |stream| {
            let _ = tx.send(stream);
        }),
    )?;
    Ok((factory, rx))
}

/// Wait until `path` holds `expected` (the writer task runs concurrently)
async fn wait_for_contents(path: &Path, expected: &[u8]) -> Result<()> {
    for _ in 0..100 {
        if let Ok(bytes) = tokio::fs::read(path).await {
            if bytes == expected {
                return Ok(());
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("{} never reached the expected contents", path.display())
}

#[tokio::test]
async fn test_response_chunks_written_in_order() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (sinks, mut acks) = factory(temp_dir.path())?;
    let path = sinks.path_for(0);
    let mut playback = PlaybackReassembler::new(Box::new(sinks));

    playback.on_audio_start();
    for chunk in [&b"one-"[..], b"two-", b"three"] {
        playback.on_chunk(chunk.to_vec());
        assert!(playback.append_in_flight());
    }
    playback.on_audio_end();
    assert_eq!(playback.queued(), 2);

    while playback.is_open() {
        let stream = tokio::time::timeout(Duration::from_secs(5), acks.recv())
            .await?
            .ok_or_else(|| anyhow::anyhow!("sink writer stopped acknowledging"))?;
        playback.on_append_complete(stream);
    }

    assert_eq!(playback.completed(), 1);
    wait_for_contents(&path, b"one-two-three").await?;
    assert!(path.ends_with("s-1-response-000.mp3"));
    Ok(())
}

#[tokio::test]
async fn test_second_audio_start_abandons_open_response() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (sinks, mut acks) = factory(temp_dir.path())?;
    let first = sinks.path_for(0);
    let second = sinks.path_for(1);
    let mut playback = PlaybackReassembler::new(Box::new(sinks));

    playback.on_audio_start();
    playback.on_chunk(b"partial".to_vec());
    assert_eq!(acks.recv().await, Some(0));

    // Protocol violation: a new response before audio_end
    playback.on_audio_start();
    playback.on_chunk(b"fresh".to_vec());
    playback.on_audio_end();
    assert_eq!(acks.recv().await, Some(1));
    playback.on_append_complete(1);

    assert_eq!(playback.completed(), 1);
    wait_for_contents(&second, b"fresh").await?;

    for _ in 0..100 {
        if !first.exists() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("abandoned response file was not removed")
}

#[tokio::test]
async fn test_chunks_without_response_are_discarded() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (sinks, _acks) = factory(temp_dir.path())?;
    let mut playback = PlaybackReassembler::new(Box::new(sinks));

    playback.on_chunk(b"orphan".to_vec());
    playback.on_audio_end();

    assert!(!playback.is_open());
    assert_eq!(playback.completed(), 0);
    assert_eq!(std::fs::read_dir(temp_dir.path())?.count(), 0);
    Ok(())
}
