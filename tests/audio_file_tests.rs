// Integration tests for WAV input and output
//
// These tests verify that WAV files can be replayed as capture input and
// that assistant audio is recorded correctly.

mod common;

use anyhow::Result;
use common::write_wav;
use std::path::PathBuf;
use tempfile::TempDir;
use tokio::sync::mpsc;
use voice_coach::audio::{
    AudioFile, AudioPlayer, CaptureBackend, CaptureConstraints, FileCapture, PlaybackBuffer,
    PlaybackCompletion, WavPlayer,
};
use voice_coach::VoiceError;

#[test]
fn test_audio_file_open() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("tone.wav");
    write_wav(&path, 16000, &vec![8192i16; 16000]);

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples.len(), 16000);
    assert!((audio.duration_seconds - 1.0).abs() < 1e-9);
    assert_eq!(audio.samples[0], 0.25);
    assert!(audio.path.contains("tone.wav"));

    Ok(())
}

#[test]
fn test_audio_file_resampled_to_capture_rate() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("slow.wav");
    write_wav(&path, 12000, &vec![0i16; 12000]);

    let audio = AudioFile::open(&path)?;
    let mono = audio.to_mono(24000);

    assert_eq!(mono.len(), 24000, "One second at 24kHz");

    Ok(())
}

#[test]
fn test_audio_file_nonexistent() {
    let path = PathBuf::from("/nonexistent/path/to/audio.wav");
    let result = AudioFile::open(&path);

    assert!(result.is_err(), "Opening nonexistent file should fail");
}

#[tokio::test]
async fn test_file_capture_missing_file_is_device_unavailable() {
    let mut capture = FileCapture::new(PathBuf::from("/nonexistent/input.wav"));
    let result = capture.start(&CaptureConstraints::default()).await;

    assert!(matches!(result, Err(VoiceError::DeviceUnavailable { .. })));
    assert!(!capture.is_capturing());
}

#[tokio::test]
async fn test_file_capture_rejects_zero_sample_rate() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("input.wav");
    write_wav(&path, 24000, &vec![0i16; 4096]);

    let constraints = CaptureConstraints {
        sample_rate: 0,
        ..CaptureConstraints::default()
    };
    let mut capture = FileCapture::new(path);
    let result = capture.start(&constraints).await;

    assert!(matches!(result, Err(VoiceError::DeviceUnavailable { .. })));
    assert!(!capture.is_capturing());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_file_capture_delivers_all_samples() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("input.wav");
    write_wav(&path, 24000, &vec![-16384i16; 10_000]);

    let mut capture = FileCapture::new(path);
    let mut blocks = capture.start(&CaptureConstraints::default()).await?;

    let mut total = 0;
    while let Some(block) = blocks.recv().await {
        assert!(block.len() <= 4096);
        assert!(block.iter().all(|&s| s == -0.5));
        total += block.len();
    }
    assert_eq!(total, 10_000);

    capture.stop().await?;
    assert!(!capture.is_capturing());

    Ok(())
}

#[tokio::test]
async fn test_wav_player_records_assistant_audio() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("replies").join("session.wav");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut player = WavPlayer::create(&path, 24000)?;

    player.play(
        PlaybackBuffer {
            samples: vec![0.5; 2400],
            sample_rate: 24000,
        },
        PlaybackCompletion::new(1, tx.clone()),
    )?;
    let done = rx.recv().await.unwrap();
    assert_eq!(done.ticket, 1);
    assert!(done.result.is_ok());

    assert_eq!(player.samples_written(), 2400);
    player.finish()?;

    let reader = hound::WavReader::open(&path)?;
    assert_eq!(reader.spec().sample_rate, 24000);
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.len(), 2400);

    // Nothing more can be written once finalized
    let result = player.play(
        PlaybackBuffer {
            samples: vec![0.1; 10],
            sample_rate: 24000,
        },
        PlaybackCompletion::new(2, tx),
    );
    assert!(matches!(result, Err(VoiceError::Playback { .. })));

    Ok(())
}
