//! TTS output provider
//!
//! Synthesizes the response text to int16 PCM and streams it through the
//! audio stream channel: one `notify_start`, a run of fixed-size chunks
//! with increasing sequence numbers, one `notify_end`. The actual voice
//! engine is a [`Synthesizer`] implementation; the built-in
//! [`ToneSynthesizer`] produces a deterministic placeholder signal so the
//! full audio path can run without any vendor service.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use aituber_core::{AudioChunk, AudioMetadata, Intent, OutputProvider, ProviderError};
use aituber_provider::ProviderContext;
use aituber_streaming::{pcm, AudioStreamChannel};

pub const PROVIDER_NAME: &str = "tts";

/// Voice engine seam. Implementations wrap vendor services (edge-tts,
/// GPT-SoVITS, …) and return int16 mono PCM at the requested rate.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, sample_rate: u32) -> Result<Vec<u8>, ProviderError>;
}

/// Deterministic placeholder: a 440 Hz tone whose duration scales with
/// the text length (~80 ms per character, capped at 10 s).
pub struct ToneSynthesizer;

#[async_trait]
impl Synthesizer for ToneSynthesizer {
    async fn synthesize(&self, text: &str, sample_rate: u32) -> Result<Vec<u8>, ProviderError> {
        let chars = text.chars().count().max(1);
        let duration_secs = (chars as f64 * 0.08).min(10.0);
        let total_samples = (duration_secs * sample_rate as f64) as usize;

        let mut samples = Vec::with_capacity(total_samples);
        for n in 0..total_samples {
            let t = n as f32 / sample_rate as f32;
            samples.push((t * 440.0 * std::f32::consts::TAU).sin() * 0.2);
        }
        Ok(pcm::f32_to_int16_bytes(&samples))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub sample_rate: u32,
    /// Chunk length handed to subscribers, in milliseconds.
    pub chunk_ms: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            chunk_ms: 20,
        }
    }
}

pub struct TtsOutputProvider {
    config: TtsConfig,
    context: Arc<ProviderContext>,
    synthesizer: Arc<dyn Synthesizer>,
}

impl TtsOutputProvider {
    pub fn new(
        config: TtsConfig,
        context: Arc<ProviderContext>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            config,
            context,
            synthesizer,
        }
    }

    fn channel(&self) -> Result<&Arc<AudioStreamChannel>, ProviderError> {
        self.context
            .audio_stream_channel()
            .ok_or_else(|| ProviderError::Init("no audio stream channel in context".into()))
    }

    fn chunk_bytes(&self) -> usize {
        let samples = self.config.sample_rate as u64 * self.config.chunk_ms / 1000;
        (samples.max(1) as usize) * 2
    }
}

#[async_trait]
impl OutputProvider for TtsOutputProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn output_type(&self) -> &str {
        "audio"
    }

    async fn start(&self) -> Result<(), ProviderError> {
        self.channel()?;
        info!(
            sample_rate = self.config.sample_rate,
            chunk_ms = self.config.chunk_ms,
            "TTS provider ready"
        );
        Ok(())
    }

    async fn execute(&self, intent: &Intent) -> Result<(), ProviderError> {
        let text = intent.response_text.trim();
        if text.is_empty() {
            debug!("empty response text, nothing to speak");
            return Ok(());
        }
        let channel = self.channel()?;

        let audio = self
            .synthesizer
            .synthesize(text, self.config.sample_rate)
            .await?;

        let metadata = AudioMetadata::new(text, self.config.sample_rate, 1);
        channel.notify_start(metadata.clone());

        let mut sequence = 0u64;
        for chunk_data in audio.chunks(self.chunk_bytes()) {
            sequence += 1;
            let chunk = AudioChunk::new(
                chunk_data.to_vec(),
                self.config.sample_rate,
                1,
                sequence,
            );
            let result = channel.publish(chunk).await;
            if !result.errors.is_empty() {
                debug!(errors = ?result.errors, "some subscribers rejected a chunk");
            }
        }

        channel.notify_end(metadata);
        debug!(chunks = sequence, "utterance streamed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aituber_events::EventBus;
    use aituber_streaming::{AudioSubscriber, SubscriberConfig};
    use parking_lot::Mutex;
    use std::time::Duration;

    struct SequenceRecorder {
        sequences: Mutex<Vec<u64>>,
        boundaries: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl AudioSubscriber for SequenceRecorder {
        async fn on_audio_start(&self, _metadata: AudioMetadata) -> Result<(), String> {
            self.boundaries.lock().push("start");
            Ok(())
        }

        async fn on_audio_chunk(&self, chunk: AudioChunk) -> Result<(), String> {
            self.sequences.lock().push(chunk.sequence);
            Ok(())
        }

        async fn on_audio_end(&self, _metadata: AudioMetadata) -> Result<(), String> {
            self.boundaries.lock().push("end");
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_utterance_streams_in_sequence() {
        let channel = Arc::new(AudioStreamChannel::new());
        let recorder = Arc::new(SequenceRecorder {
            sequences: Mutex::new(Vec::new()),
            boundaries: Mutex::new(Vec::new()),
        });
        channel.subscribe("lipsync", recorder.clone(), SubscriberConfig::default());

        let context = Arc::new(
            ProviderContext::new(EventBus::new()).with_audio_stream_channel(Arc::clone(&channel)),
        );
        let provider =
            TtsOutputProvider::new(TtsConfig::default(), context, Arc::new(ToneSynthesizer));
        provider.start().await.unwrap();

        provider.execute(&Intent::new("hi", "hello")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let sequences = recorder.sequences.lock().clone();
        assert!(!sequences.is_empty());
        // Strictly increasing from 1.
        assert_eq!(sequences[0], 1);
        assert!(sequences.windows(2).all(|w| w[1] == w[0] + 1));
        assert_eq!(*recorder.boundaries.lock(), vec!["start", "end"]);
    }

    #[tokio::test]
    async fn test_start_fails_without_channel() {
        let context = Arc::new(ProviderContext::new(EventBus::new()));
        let provider =
            TtsOutputProvider::new(TtsConfig::default(), context, Arc::new(ToneSynthesizer));
        assert!(matches!(provider.start().await, Err(ProviderError::Init(_))));
    }

    #[tokio::test]
    async fn test_empty_text_skips_synthesis() {
        let channel = Arc::new(AudioStreamChannel::new());
        let context = Arc::new(
            ProviderContext::new(EventBus::new()).with_audio_stream_channel(channel),
        );
        let provider =
            TtsOutputProvider::new(TtsConfig::default(), context, Arc::new(ToneSynthesizer));
        provider.execute(&Intent::new("x", "   ")).await.unwrap();
    }

    #[test]
    fn test_chunk_bytes() {
        let context = Arc::new(ProviderContext::new(EventBus::new()));
        let provider = TtsOutputProvider::new(
            TtsConfig {
                sample_rate: 16_000,
                chunk_ms: 20,
            },
            context,
            Arc::new(ToneSynthesizer),
        );
        // 320 samples * 2 bytes.
        assert_eq!(provider.chunk_bytes(), 640);
    }
}
