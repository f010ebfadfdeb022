//! PCM16 conversion and base64 framing for realtime audio.
//!
//! Capture converts f32 samples in [-1, 1] to signed 16-bit integers with
//! asymmetric linear scaling (negative values by 32768, non-negative by
//! 32767). Playback decodes remote PCM16 by a flat 1/32768.

use base64::Engine;

use crate::error::{Result, VoiceError};

/// Output sample rate for assistant audio
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Default capture sample rate
pub const CAPTURE_SAMPLE_RATE: u32 = 24000;

/// Number of samples in one capture frame
pub const CAPTURE_FRAME_SIZE: usize = 4096;

/// Scale applied to negative samples
const NEGATIVE_SCALE: f32 = 32768.0;

/// Scale applied to non-negative samples
const POSITIVE_SCALE: f32 = 32767.0;

/// Convert one float sample to PCM16.
pub fn encode_sample(sample: f32) -> i16 {
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    if s < 0.0 {
        (s * NEGATIVE_SCALE).round() as i16
    } else {
        (s * POSITIVE_SCALE).round() as i16
    }
}

/// Exact inverse of [`encode_sample`] (used to verify captured frames).
pub fn decode_sample(sample: i16) -> f32 {
    if sample < 0 {
        sample as f32 / NEGATIVE_SCALE
    } else {
        sample as f32 / POSITIVE_SCALE
    }
}

/// Convert a block of float samples to PCM16.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| encode_sample(s)).collect()
}

/// Inverse of [`float_to_pcm16`].
pub fn pcm16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| decode_sample(s)).collect()
}

/// Normalize remote PCM16 for playback (scale by 1/32768).
pub fn pcm16_to_playback(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / NEGATIVE_SCALE).collect()
}

/// Serialize samples as little-endian bytes.
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Parse little-endian PCM16 bytes.
///
/// Fails with `FrameDecodeFailure` when the payload has a dangling byte.
pub fn bytes_to_pcm16(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(VoiceError::FrameDecodeFailure {
            message: format!("PCM16 payload has odd length {}", bytes.len()),
        });
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect())
}

/// Encode a captured float frame as base64 PCM16, ready for the wire.
pub fn encode_frame(samples: &[f32]) -> String {
    let pcm_bytes = pcm16_to_bytes(&float_to_pcm16(samples));
    base64::engine::general_purpose::STANDARD.encode(pcm_bytes)
}

/// Decode a base64 audio delta from the remote endpoint into raw bytes.
pub fn decode_audio_delta(delta: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(delta)
        .map_err(|e| VoiceError::FrameDecodeFailure {
            message: format!("invalid base64 audio delta: {}", e),
        })
}

/// Playback duration of `sample_count` mono samples.
pub fn duration_of(sample_count: usize, sample_rate: u32) -> std::time::Duration {
    if sample_rate == 0 {
        return std::time::Duration::ZERO;
    }
    std::time::Duration::from_secs_f64(sample_count as f64 / sample_rate as f64)
}
