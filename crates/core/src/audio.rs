//! Audio chunk types shared by TTS providers and the streaming channel

use serde::{Deserialize, Serialize};

use crate::time::unix_now;

/// Metadata accompanying the start and end boundaries of one utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioMetadata {
    /// Text the utterance was synthesized from.
    pub text: String,
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default)]
    pub timestamp: f64,
}

fn default_channels() -> u16 {
    1
}

impl AudioMetadata {
    pub fn new(text: impl Into<String>, sample_rate: u32, channels: u16) -> Self {
        Self {
            text: text.into(),
            sample_rate,
            channels,
            timestamp: unix_now(),
        }
    }
}

/// One block of int16 PCM audio.
///
/// Chunks are by-value: every subscriber of the stream channel receives its
/// own copy, never a shared mutable buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioChunk {
    /// Interleaved int16 little-endian samples.
    pub data: Vec<u8>,
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    /// Monotonically increasing per utterance.
    pub sequence: u64,
    #[serde(default)]
    pub timestamp: f64,
}

impl AudioChunk {
    pub fn new(data: Vec<u8>, sample_rate: u32, channels: u16, sequence: u64) -> Self {
        Self {
            data,
            sample_rate,
            channels,
            sequence,
            timestamp: unix_now(),
        }
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Chunk duration in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        let samples = self.data.len() as f64 / 2.0 / self.channels as f64;
        samples / self.sample_rate as f64 * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_duration() {
        // 16 kHz mono, 320 samples = 20 ms.
        let chunk = AudioChunk::new(vec![0u8; 640], 16_000, 1, 0);
        assert_eq!(chunk.size(), 640);
        assert!((chunk.duration_ms() - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_rate_duration() {
        let chunk = AudioChunk::new(vec![0u8; 4], 0, 1, 0);
        assert_eq!(chunk.duration_ms(), 0.0);
    }
}
