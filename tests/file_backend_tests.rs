// Integration tests for the file capture backend
//
// These tests write WAV fixtures with hound and verify that the file backend
// decodes, conforms and frames them the way a live capture device would.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use voice_chat::audio::{
    AudioBackend, AudioBackendConfig, AudioFile, EnergyVad, FileBackend, VadConfig, VadEdge,
};

/// Write a WAV file: `tone_ms` of a 440Hz tone followed by `silence_ms` of silence
fn write_wav(
    dir: &Path,
    name: &str,
    rate: u32,
    channels: u16,
    tone_ms: u32,
    silence_ms: u32,
) -> Result<PathBuf> {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec)?;

    let tone = rate * tone_ms / 1000;
    let silence = rate * silence_ms / 1000;
    for i in 0..tone + silence {
        let sample = if i < tone {
            let t = i as f32 / rate as f32;
            ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 8000.0) as i16
        } else {
            0
        };
        for _ in 0..channels {
            writer.write_sample(sample)?;
        }
    }
    writer.finalize()?;
    Ok(path)
}

#[tokio::test]
async fn test_file_backend_frames_whole_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = write_wav(temp_dir.path(), "mono.wav", 16000, 1, 1000, 0)?;

    let mut backend = FileBackend::new(path, AudioBackendConfig::default(), false);
    let (format, mut frames) = backend.start().await?;
    assert_eq!(format.sample_rate, 16000);
    assert_eq!(format.channels, 1);

    let mut total = 0;
    let mut count = 0;
    while let Some(frame) = frames.recv().await {
        assert_eq!(frame.samples.len(), 640, "40ms frames at 16kHz");
        assert_eq!(frame.timestamp_ms, count * 40);
        total += frame.samples.len();
        count += 1;
    }
    assert_eq!(total, 16000);
    assert_eq!(count, 25);

    backend.stop().await?;
    assert!(!backend.is_capturing());
    Ok(())
}

#[tokio::test]
async fn test_stereo_48k_is_conformed_to_mono_16k() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = write_wav(temp_dir.path(), "stereo.wav", 48000, 2, 500, 0)?;

    let audio = AudioFile::open(&path)?;
    assert_eq!(audio.channels, 2);
    assert_eq!(audio.sample_rate, 48000);
    assert!((audio.duration_seconds - 0.5).abs() < 0.01);

    let samples = audio.conform(16000, 1);
    assert_eq!(samples.len(), 8000);
    assert_eq!(audio.conformed_rate(16000, 1), 16000);

    let mut backend = FileBackend::new(path, AudioBackendConfig::default(), false);
    let (format, mut frames) = backend.start().await?;
    assert_eq!(format.sample_rate, 16000);
    assert_eq!(format.channels, 1);

    let mut total = 0;
    while let Some(frame) = frames.recv().await {
        total += frame.samples.len();
    }
    assert_eq!(total, 8000);
    Ok(())
}

#[tokio::test]
async fn test_tone_then_silence_produces_both_vad_edges() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = write_wav(temp_dir.path(), "utterance.wav", 16000, 1, 600, 800)?;

    let mut backend = FileBackend::new(path, AudioBackendConfig::default(), false);
    let (_, mut frames) = backend.start().await?;
    let mut vad = EnergyVad::new(VadConfig::default());

    let mut edges = Vec::new();
    while let Some(frame) = frames.recv().await {
        edges.extend(vad.process(&frame));
    }
    assert_eq!(edges, vec![VadEdge::Speaking, VadEdge::StoppedSpeaking]);
    Ok(())
}

#[tokio::test]
async fn test_realtime_backend_keeps_delivering_silence() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = write_wav(temp_dir.path(), "short.wav", 16000, 1, 80, 0)?;

    let mut backend = FileBackend::new(path, AudioBackendConfig::default(), true);
    let (_, mut frames) = backend.start().await?;

    // Two frames of tone, then silence until the device is released
    for i in 0..5 {
        let frame = frames.recv().await.ok_or_else(|| anyhow::anyhow!("stream ended"))?;
        if i >= 2 {
            assert!(frame.samples.iter().all(|s| *s == 0));
        }
    }
    assert!(backend.is_capturing());

    backend.stop().await?;
    assert!(!backend.is_capturing());
    Ok(())
}

#[tokio::test]
async fn test_missing_file_fails_to_start() {
    let mut backend = FileBackend::new(
        PathBuf::from("/nonexistent/voice.wav"),
        AudioBackendConfig::default(),
        false,
    );
    assert!(backend.start().await.is_err());
}

#[tokio::test]
async fn test_zero_target_rate_is_refused() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = write_wav(temp_dir.path(), "tone.wav", 16000, 1, 200, 0)?;

    let config = AudioBackendConfig {
        target_sample_rate: 0,
        ..AudioBackendConfig::default()
    };
    let mut backend = FileBackend::new(path, config, false);
    assert!(backend.start().await.is_err());
    assert!(!backend.is_capturing());
    Ok(())
}
