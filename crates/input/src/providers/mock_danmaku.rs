//! Mock danmaku provider
//!
//! Replays chat messages from a JSONL file at a fixed interval,
//! optionally looping. Each line is `{"text": …, "user": …, "user_id": …}`.
//! Useful for exercising the full pipeline without a live platform
//! connection.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use aituber_core::{
    DataType, InputProvider, MessageStream, NormalizedMessage, ProviderError, RawUser,
};

pub const PROVIDER_NAME: &str = "mock_danmaku";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MockDanmakuConfig {
    pub data_file: String,
    /// Seconds between replayed messages (floor 0.1).
    pub send_interval: f64,
    pub loop_playback: bool,
    pub importance: f64,
}

impl Default for MockDanmakuConfig {
    fn default() -> Self {
        Self {
            data_file: "msg_default.jsonl".into(),
            send_interval: 1.0,
            loop_playback: true,
            importance: 0.5,
        }
    }
}

#[derive(Deserialize)]
struct DanmakuLine {
    text: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

pub struct MockDanmakuProvider {
    config: MockDanmakuConfig,
    lines: Mutex<Vec<String>>,
    stopped: Arc<AtomicBool>,
}

impl MockDanmakuProvider {
    pub fn new(config: MockDanmakuConfig) -> Self {
        Self {
            config,
            lines: Mutex::new(Vec::new()),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.config.send_interval.max(0.1))
    }

    fn parse_line(&self, line: &str) -> Option<NormalizedMessage> {
        let parsed: DanmakuLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, preview = %line.chars().take(100).collect::<String>(),
                      "skipping malformed replay line");
                return None;
            }
        };
        if parsed.text.is_empty() {
            return None;
        }
        Some(
            NormalizedMessage::new(parsed.text, PROVIDER_NAME)
                .with_data_type(DataType::Text)
                .with_importance(self.config.importance)
                .with_raw(RawUser {
                    user_id: parsed.user_id.unwrap_or_else(|| "mock_user".into()),
                    user_name: parsed.user,
                    display_text: None,
                    extra: serde_json::Map::new(),
                }),
        )
    }
}

#[async_trait]
impl InputProvider for MockDanmakuProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn start(&self) -> Result<(), ProviderError> {
        self.stopped.store(false, Ordering::SeqCst);
        let path = PathBuf::from(&self.config.data_file);
        let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
            ProviderError::Init(format!("cannot read replay file {}: {e}", path.display()))
        })?;
        let lines: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        info!(
            file = %path.display(),
            count = lines.len(),
            interval_secs = self.config.send_interval,
            "mock danmaku replay loaded"
        );
        *self.lines.lock() = lines;
        Ok(())
    }

    fn stream(&self) -> MessageStream<'_> {
        let stopped = Arc::clone(&self.stopped);
        let interval = self.interval();
        let loop_playback = self.config.loop_playback;

        Box::pin(stream! {
            let lines = self.lines.lock().clone();
            if lines.is_empty() {
                warn!("no replay messages loaded, stream is empty");
                return;
            }

            let mut index = 0usize;
            loop {
                if stopped.load(Ordering::SeqCst) {
                    break;
                }
                if index >= lines.len() {
                    if loop_playback {
                        index = 0;
                    } else {
                        info!("replay finished (loop disabled)");
                        break;
                    }
                }

                if let Some(message) = self.parse_line(&lines[index]) {
                    yield message;
                }
                index += 1;

                tokio::time::sleep(interval).await;
            }
        })
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.cleanup().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn write_replay(lines: &[&str]) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.jsonl");
        std::fs::write(&path, lines.join("\n")).unwrap();
        let path_str = path.to_string_lossy().into_owned();
        (dir, path_str)
    }

    #[tokio::test]
    async fn test_replays_file_once() {
        let (_dir, path) = write_replay(&[
            r#"{"text": "hello", "user": "alice", "user_id": "a1"}"#,
            r#"not json"#,
            r#"{"text": "world"}"#,
        ]);
        let provider = MockDanmakuProvider::new(MockDanmakuConfig {
            data_file: path,
            send_interval: 0.1,
            loop_playback: false,
            ..Default::default()
        });
        provider.start().await.unwrap();

        let messages: Vec<NormalizedMessage> = provider.stream().collect().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "hello");
        assert_eq!(messages[0].user_id(), Some("a1"));
        assert_eq!(messages[1].text, "world");
        assert_eq!(messages[1].user_id(), Some("mock_user"));
    }

    #[tokio::test]
    async fn test_stop_ends_looping_stream() {
        let (_dir, path) = write_replay(&[r#"{"text": "again"}"#]);
        let provider = Arc::new(MockDanmakuProvider::new(MockDanmakuConfig {
            data_file: path,
            send_interval: 0.1,
            loop_playback: true,
            ..Default::default()
        }));
        provider.start().await.unwrap();

        let consumer = {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move {
                let mut stream = provider.stream();
                let mut count = 0usize;
                while stream.next().await.is_some() {
                    count += 1;
                }
                count
            })
        };

        tokio::time::sleep(Duration::from_millis(350)).await;
        provider.stop().await;
        let count = consumer.await.unwrap();
        assert!(count >= 2, "looped replay should have produced messages");
    }

    #[tokio::test]
    async fn test_missing_file_is_init_error() {
        let provider = MockDanmakuProvider::new(MockDanmakuConfig {
            data_file: "/definitely/not/here.jsonl".into(),
            ..Default::default()
        });
        assert!(matches!(
            provider.start().await,
            Err(ProviderError::Init(_))
        ));
    }
}
