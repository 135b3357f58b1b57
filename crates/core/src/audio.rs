//! Audio device seams and PCM16 plumbing.
//!
//! The capture and playback devices are external collaborators; the session
//! manager only sees these traits. Frames travel as interleaved mono `i16`
//! samples at the service rate.

use crate::error::DecodeError;
use base64::Engine;
use tokio::sync::mpsc;

/// Sample rate the service speaks on both directions.
pub const SERVICE_SAMPLE_RATE: u32 = 24_000;

/// Where playback stopped when it was interrupted: the logical track (item id)
/// and how many samples of it had actually been played.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackOffset {
    pub track_id: String,
    pub sample_offset: usize,
}

impl TrackOffset {
    /// Millisecond offset at the service sample rate, for `conversation.item.truncate`.
    pub fn offset_ms(&self) -> u64 {
        (self.sample_offset as u64 * 1000) / SERVICE_SAMPLE_RATE as u64
    }
}

/// A fully decoded, playable audio artifact attached to a completed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

impl DecodedAudio {
    pub fn duration_ms(&self) -> u64 {
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }
}

/// Microphone capture. `record` hands the device a channel to deliver frames
/// into; `pause` stops delivery without tearing the device down.
pub trait AudioCapture: Send + Sync {
    fn begin(&self) -> anyhow::Result<()>;
    fn record(&self, sink: mpsc::Sender<Vec<i16>>) -> anyhow::Result<()>;
    fn pause(&self) -> anyhow::Result<()>;
    fn end(&self) -> anyhow::Result<()>;
}

/// Speaker playback. Frames append to a logical track; `interrupt` stops
/// everything and reports how far the current track actually got, or `None`
/// when nothing was playing (or the device cannot tell).
pub trait AudioPlayback: Send + Sync {
    fn connect(&self) -> anyhow::Result<()>;
    fn add_pcm16(&self, track_id: &str, frames: &[i16]);
    fn interrupt(&self) -> Option<TrackOffset>;
    /// Coarse magnitude bins for visualization. Cosmetic only.
    fn frequencies(&self, bins: usize) -> Vec<f32>;
}

/// Decodes a base64 PCM16 payload into samples.
pub fn decode_pcm16_base64(payload: &str) -> Result<Vec<i16>, DecodeError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(payload)?;
    pcm16_from_bytes(&bytes)
}

/// Interprets little-endian PCM16 bytes as samples.
pub fn pcm16_from_bytes(bytes: &[u8]) -> Result<Vec<i16>, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect())
}

/// Encodes samples as the base64 little-endian PCM16 the wire expects.
pub fn encode_pcm16_base64(samples: &[i16]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Base64 payload back to raw bytes, for incremental accumulation on an item.
pub fn bytes_from_base64(payload: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(payload)?)
}

pub fn pcm16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

pub fn f32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}
