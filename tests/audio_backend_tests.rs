// Unit tests for audio backend abstractions
//
// These tests verify the core capture types and the backend factory.

use std::path::PathBuf;
use voice_chat::audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource, DeviceError,
};

#[test]
fn test_audio_frame_duration() {
    let frame = AudioFrame {
        samples: vec![0; 640],
        sample_rate: 16000,
        channels: 1,
        timestamp_ms: 1000,
    };
    assert_eq!(frame.duration_ms(), 40);

    let stereo = AudioFrame {
        samples: vec![0; 1920],
        sample_rate: 48000,
        channels: 2,
        timestamp_ms: 0,
    };
    assert_eq!(stereo.duration_ms(), 20);
}

#[test]
fn test_audio_frame_duration_with_bad_format() {
    let frame = AudioFrame {
        samples: vec![1, 2, 3],
        sample_rate: 0,
        channels: 1,
        timestamp_ms: 0,
    };
    assert_eq!(frame.duration_ms(), 0);
}

#[test]
fn test_backend_config_defaults_match_vad_window() {
    let config = AudioBackendConfig::default();
    assert_eq!(config.target_sample_rate, 16000);
    assert_eq!(config.target_channels, 1);
    assert_eq!(config.buffer_duration_ms, 40);
}

#[test]
fn test_factory_creates_file_backend() -> anyhow::Result<()> {
    let backend = AudioBackendFactory::create(
        AudioSource::File {
            path: PathBuf::from("input.wav"),
            realtime: true,
        },
        AudioBackendConfig::default(),
    )?;
    assert_eq!(backend.name(), "file");
    assert!(!backend.is_capturing());
    Ok(())
}

#[test]
fn test_factory_reports_missing_microphone() {
    let err = match AudioBackendFactory::create(AudioSource::Microphone, AudioBackendConfig::default()) {
        Ok(_) => panic!("microphone backend should not exist"),
        Err(e) => e,
    };
    assert!(matches!(
        err.downcast_ref::<DeviceError>(),
        Some(DeviceError::NoMicrophone)
    ));
}
