//! Normalized input messages
//!
//! Every input provider, regardless of platform, produces
//! [`NormalizedMessage`] values. The message is immutable once created;
//! pipelines that want to amend one must build a copy.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::time::unix_now;

/// Kind of data a message carries.
///
/// The common platform kinds are closed variants; anything else round-trips
/// through [`DataType::Other`] so extension providers can introduce their
/// own kinds without touching the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[default]
    Text,
    Gift,
    SuperChat,
    Guard,
    Enter,
    #[serde(untagged)]
    Other(String),
}

impl DataType {
    pub fn as_str(&self) -> &str {
        match self {
            DataType::Text => "text",
            DataType::Gift => "gift",
            DataType::SuperChat => "super_chat",
            DataType::Guard => "guard",
            DataType::Enter => "enter",
            DataType::Other(s) => s,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform-native sender information attached to a message.
///
/// The original platform object is opaque to the core; the contract is
/// only that a user id and a display text are reachable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawUser {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_text: Option<String>,
    /// Platform-specific leftovers (room id, medal level, …).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// Intermediate record used by a few providers before normalization.
///
/// Most providers construct [`NormalizedMessage`] directly and never touch
/// this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawData {
    pub content: Value,
    pub source: String,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl RawData {
    pub fn new(content: Value, source: impl Into<String>) -> Self {
        Self {
            content,
            source: source.into(),
            data_type: DataType::Text,
            timestamp: unix_now(),
            metadata: Map::new(),
        }
    }
}

/// The unit flowing from the input domain to the decision domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMessage {
    /// Human-readable, LLM-ready description of the event.
    pub text: String,
    /// Provider identifier (e.g. `"console_input"`, `"bili_danmaku"`).
    pub source: String,
    #[serde(default)]
    pub data_type: DataType,
    /// Importance score in `[0, 1]`, used for filtering and priority.
    #[serde(default = "default_importance")]
    pub importance: f64,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<RawUser>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_importance() -> f64 {
    0.5
}

impl NormalizedMessage {
    /// Creates a message with the current timestamp and default importance.
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
            data_type: DataType::Text,
            importance: default_importance(),
            timestamp: unix_now(),
            raw: None,
            metadata: Map::new(),
        }
    }

    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    /// Sets importance, clamped into `[0, 1]`.
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn with_raw(mut self, raw: RawUser) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Sender id, when the platform provided one.
    pub fn user_id(&self) -> Option<&str> {
        self.raw.as_ref().map(|r| r.user_id.as_str())
    }

    /// Sender display name, when the platform provided one.
    pub fn user_name(&self) -> Option<&str> {
        self.raw.as_ref().and_then(|r| r.user_name.as_deref())
    }

    /// Text to show on screen; falls back to the normalized text.
    pub fn display_text(&self) -> &str {
        self.raw
            .as_ref()
            .and_then(|r| r.display_text.as_deref())
            .unwrap_or(&self.text)
    }

    /// Whether the message satisfies the normalization invariants.
    pub fn is_valid(&self) -> bool {
        !self.text.is_empty() && (0.0..=1.0).contains(&self.importance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_importance_is_clamped() {
        let msg = NormalizedMessage::new("hi", "console_input").with_importance(1.7);
        assert_eq!(msg.importance, 1.0);
        let msg = NormalizedMessage::new("hi", "console_input").with_importance(-0.3);
        assert_eq!(msg.importance, 0.0);
    }

    #[test]
    fn test_display_text_falls_back_to_text() {
        let msg = NormalizedMessage::new("hello", "console_input");
        assert_eq!(msg.display_text(), "hello");

        let msg = msg.with_raw(RawUser {
            user_id: "u1".into(),
            user_name: Some("viewer".into()),
            display_text: Some("hello!".into()),
            extra: Map::new(),
        });
        assert_eq!(msg.display_text(), "hello!");
        assert_eq!(msg.user_id(), Some("u1"));
        assert_eq!(msg.user_name(), Some("viewer"));
    }

    #[test]
    fn test_data_type_round_trip() {
        for (dt, s) in [
            (DataType::Text, "\"text\""),
            (DataType::SuperChat, "\"super_chat\""),
            (DataType::Other("screen_text".into()), "\"screen_text\""),
        ] {
            let json = serde_json::to_string(&dt).unwrap();
            assert_eq!(json, s);
            let back: DataType = serde_json::from_str(&json).unwrap();
            assert_eq!(back, dt);
        }
    }

    #[test]
    fn test_message_serde_round_trip() {
        let msg = NormalizedMessage::new("666", "bili_danmaku")
            .with_data_type(DataType::Gift)
            .with_importance(0.9)
            .with_metadata("room_id", Value::from(42));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["data_type"], "gift");
        let back: NormalizedMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back.text, "666");
        assert_eq!(back.importance, 0.9);
        assert!(back.is_valid());
    }
}
