//! Near-duplicate message filtering
//!
//! Keeps the first message and drops later ones that are too similar
//! within a short window. Similarity is the Ratcliff/Obershelp ratio,
//! boosted for containment ("666" vs "6666") when the shorter text is at
//! least half the longer one.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use aituber_core::{
    unix_now, ErrorHandling, InputPipeline, NormalizedMessage, PipelineError,
};

use super::{user_key, PipelineCommonConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityFilterConfig {
    #[serde(flatten)]
    pub common: PipelineCommonConfig,
    /// Drop when similarity reaches this value (0–1).
    pub similarity_threshold: f64,
    /// Seconds a message stays in the comparison cache.
    pub time_window: f64,
    /// Texts shorter than this always pass.
    pub min_text_length: usize,
    /// Compare against other senders' messages too.
    pub cross_user_filter: bool,
}

impl Default for SimilarityFilterConfig {
    fn default() -> Self {
        Self {
            common: PipelineCommonConfig::default(),
            similarity_threshold: 0.85,
            time_window: 5.0,
            min_text_length: 3,
            cross_user_filter: true,
        }
    }
}

struct CachedText {
    timestamp: f64,
    text: String,
    user: String,
}

#[derive(Default)]
struct Cache {
    groups: HashMap<String, VecDeque<CachedText>>,
    last_cleanup: f64,
}

pub struct SimilarityFilterPipeline {
    config: SimilarityFilterConfig,
    cache: Mutex<Cache>,
}

impl SimilarityFilterPipeline {
    pub fn new(config: SimilarityFilterConfig) -> Self {
        info!(
            threshold = config.similarity_threshold,
            window_secs = config.time_window,
            cross_user = config.cross_user_filter,
            "similarity filter pipeline initialized"
        );
        Self {
            config,
            cache: Mutex::new(Cache::default()),
        }
    }

    pub fn from_config(value: &serde_json::Value) -> Self {
        let config: SimilarityFilterConfig =
            serde_json::from_value(value.clone()).unwrap_or_else(|e| {
                warn!(error = %e, "invalid similar_filter config, using defaults");
                SimilarityFilterConfig::default()
            });
        Self::new(config)
    }

    fn group_key(message: &NormalizedMessage) -> String {
        message
            .metadata
            .get("group_id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("default")
            .to_string()
    }

    fn prune(&self, cache: &mut Cache, now: f64) {
        // Lazy cleanup at half-window cadence.
        if now - cache.last_cleanup < self.config.time_window / 2.0 {
            return;
        }
        cache.last_cleanup = now;
        let cutoff = now - self.config.time_window;
        cache.groups.retain(|_, entries| {
            while entries.front().is_some_and(|e| e.timestamp < cutoff) {
                entries.pop_front();
            }
            !entries.is_empty()
        });
    }

    fn check_at(&self, message: &NormalizedMessage, now: f64) -> bool {
        let text = &message.text;
        if text.chars().count() < self.config.min_text_length {
            debug!(len = text.chars().count(), "text below minimum length, passing");
            return true;
        }

        let user = user_key(message);
        let group = Self::group_key(message);
        let cutoff = now - self.config.time_window;

        let mut cache = self.cache.lock();
        self.prune(&mut cache, now);

        if let Some(entries) = cache.groups.get(&group) {
            for cached in entries {
                if cached.timestamp < cutoff {
                    continue;
                }
                if !self.config.cross_user_filter && cached.user != user {
                    continue;
                }
                let score = similarity(text, &cached.text);
                if score >= self.config.similarity_threshold {
                    debug!(
                        score = format!("{score:.2}"),
                        new = %text.chars().take(30).collect::<String>(),
                        cached = %cached.text.chars().take(30).collect::<String>(),
                        "similar text found"
                    );
                    return false;
                }
            }
        }

        cache.groups.entry(group).or_default().push_back(CachedText {
            timestamp: now,
            text: text.clone(),
            user,
        });
        true
    }

    pub fn reset(&self) {
        let mut cache = self.cache.lock();
        cache.groups.clear();
        cache.last_cleanup = 0.0;
    }
}

#[async_trait]
impl InputPipeline for SimilarityFilterPipeline {
    fn name(&self) -> &str {
        "similar_filter"
    }

    fn priority(&self) -> i32 {
        self.config.common.priority
    }

    fn enabled(&self) -> bool {
        self.config.common.enabled
    }

    fn error_handling(&self) -> ErrorHandling {
        self.config.common.error_handling()
    }

    fn timeout(&self) -> Duration {
        self.config.common.timeout()
    }

    async fn process(
        &self,
        message: NormalizedMessage,
    ) -> Result<Option<NormalizedMessage>, PipelineError> {
        if self.check_at(&message, unix_now()) {
            Ok(Some(message))
        } else {
            info!(
                preview = %message.text.chars().take(50).collect::<String>(),
                "similar message filtered"
            );
            Ok(None)
        }
    }
}

/// Ratcliff/Obershelp similarity over characters, with a containment
/// boost when the shorter string covers at least half the longer one.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    if a_chars.is_empty() && b_chars.is_empty() {
        return 1.0;
    }
    if a_chars.is_empty() || b_chars.is_empty() {
        return 0.0;
    }

    let matches = match_count(&a_chars, &b_chars);
    let mut score = 2.0 * matches as f64 / (a_chars.len() + b_chars.len()) as f64;

    if a.contains(b) || b.contains(a) {
        let longer = a_chars.len().max(b_chars.len());
        let shorter = a_chars.len().min(b_chars.len());
        if shorter * 2 >= longer {
            score = score.max(shorter as f64 / longer as f64);
        }
    }

    score
}

/// Total matched characters: longest common substring, then recurse on
/// both unmatched flanks.
fn match_count(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (a_start, b_start, len) = longest_common_substring(a, b);
    if len == 0 {
        return 0;
    }
    len + match_count(&a[..a_start], &b[..b_start])
        + match_count(&a[a_start + len..], &b[b_start + len..])
}

fn longest_common_substring(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    // lengths[j] = length of common suffix ending at a[i], b[j]
    let mut lengths = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        let mut prev = 0;
        for (j, &cb) in b.iter().enumerate() {
            let current = lengths[j];
            if ca == cb {
                let len = prev + 1;
                lengths[j] = len;
                if len > best.2 {
                    best = (i + 1 - len, j + 1 - len, len);
                }
            } else {
                lengths[j] = 0;
            }
            prev = current;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_texts() {
        assert_eq!(similarity("666", "666"), 1.0);
    }

    #[test]
    fn test_contained_short_text_ratio() {
        // Sequence ratio 2*3/7 ≈ 0.857; containment ratio 3/4 = 0.75.
        let score = similarity("666", "6666");
        assert!((score - 6.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_texts() {
        assert_eq!(similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_containment_boost() {
        // Ratio 2*4/12 ≈ 0.67 without the boost; containment gives 0.5,
        // which only applies because 4 * 2 >= 8.
        let score = similarity("abcd", "abcdefgh");
        assert!((score - 2.0 * 4.0 / 12.0).abs() < 1e-9);

        // Shorter than half the longer text: no boost applies.
        let score = similarity("ab", "abcdefgh");
        assert!(score < 0.5);
    }

    fn filter(threshold: f64, window: f64) -> SimilarityFilterPipeline {
        SimilarityFilterPipeline::new(SimilarityFilterConfig {
            similarity_threshold: threshold,
            time_window: window,
            ..Default::default()
        })
    }

    fn msg(text: &str, user: &str) -> NormalizedMessage {
        NormalizedMessage::new(text, "test").with_raw(aituber_core::RawUser {
            user_id: user.into(),
            ..Default::default()
        })
    }

    #[test]
    fn test_duplicate_within_window_dropped() {
        let pipeline = filter(0.85, 5.0);
        assert!(pipeline.check_at(&msg("666", "u1"), 0.0));
        assert!(!pipeline.check_at(&msg("666", "u1"), 1.0));
        // "6666" vs "666": ratio ≈ 0.857 ≥ 0.85.
        assert!(!pipeline.check_at(&msg("6666", "u1"), 2.0));
    }

    #[test]
    fn test_duplicate_outside_window_passes() {
        let pipeline = filter(0.85, 5.0);
        assert!(pipeline.check_at(&msg("666", "u1"), 0.0));
        assert!(pipeline.check_at(&msg("666", "u1"), 6.0));
    }

    #[test]
    fn test_short_text_bypasses_filter() {
        let pipeline = filter(0.85, 5.0);
        assert!(pipeline.check_at(&msg("ok", "u1"), 0.0));
        assert!(pipeline.check_at(&msg("ok", "u1"), 0.5));
    }

    #[test]
    fn test_cross_user_filter_toggle() {
        let pipeline = SimilarityFilterPipeline::new(SimilarityFilterConfig {
            cross_user_filter: false,
            ..Default::default()
        });
        assert!(pipeline.check_at(&msg("hello world", "u1"), 0.0));
        // Different sender, per-user mode: passes.
        assert!(pipeline.check_at(&msg("hello world", "u2"), 1.0));
        // Same sender: dropped.
        assert!(!pipeline.check_at(&msg("hello world", "u1"), 2.0));
    }
}
