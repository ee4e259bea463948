//! Decision output: intents and their actions
//!
//! An [`Intent`] is produced by the active decision provider and consumed
//! by every enabled output provider. It is published exactly once and not
//! retained afterwards.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::message::DataType;
use crate::time::unix_now;

/// Closed emotion set carried by every intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Sad,
    Angry,
    Surprised,
    Confused,
    Scared,
    Love,
    Shy,
    Excited,
}

impl Emotion {
    /// Parses a string, coercing anything unknown to [`Emotion::Neutral`].
    ///
    /// Serde stays strict; lenient parsing is for decision providers
    /// dealing with free-form LLM output.
    pub fn parse_lenient(s: &str) -> Self {
        serde_json::from_value(Value::String(s.trim().to_lowercase())).unwrap_or_default()
    }
}

/// Closed set of avatar/side-effect directive kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Expression,
    Hotkey,
    Emoji,
    Blink,
    Nod,
    Shake,
    Wave,
    Clap,
    Sticker,
    Motion,
    Custom,
    GameAction,
    #[default]
    None,
}

impl ActionType {
    /// Parses a string, coercing anything unknown to [`ActionType::None`].
    pub fn parse_lenient(s: &str) -> Self {
        serde_json::from_value(Value::String(s.trim().to_lowercase())).unwrap_or_default()
    }
}

/// One unit of avatar or side-effect directive inside an intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub params: Map<String, Value>,
    /// 0–100; higher runs sooner.
    #[serde(default = "default_action_priority")]
    pub priority: u8,
}

fn default_action_priority() -> u8 {
    50
}

impl IntentAction {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            params: Map::new(),
            priority: default_action_priority(),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(100);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// The default idle action appended when a decision yields none.
    pub fn default_blink() -> Self {
        Self::new(ActionType::Blink).with_priority(30)
    }
}

/// Provenance of the message an intent answers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceContext {
    pub source: String,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_nickname: Option<String>,
    #[serde(default)]
    pub importance: f64,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// The unit flowing from the decision domain to the output domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub original_text: String,
    /// What to speak / show.
    pub response_text: String,
    #[serde(default)]
    pub emotion: Emotion,
    #[serde(default)]
    pub actions: Vec<IntentAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_context: Option<SourceContext>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub timestamp: f64,
}

impl Intent {
    pub fn new(original_text: impl Into<String>, response_text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_text: original_text.into(),
            response_text: response_text.into(),
            emotion: Emotion::Neutral,
            actions: Vec::new(),
            source_context: None,
            metadata: Map::new(),
            timestamp: unix_now(),
        }
    }

    pub fn with_emotion(mut self, emotion: Emotion) -> Self {
        self.emotion = emotion;
        self
    }

    pub fn with_action(mut self, action: IntentAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_source_context(mut self, ctx: SourceContext) -> Self {
        self.source_context = Some(ctx);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Actions in dispatch order (highest priority first, stable).
    pub fn actions_by_priority(&self) -> Vec<IntentAction> {
        let mut sorted = self.actions.clone();
        sorted.sort_by(|a, b| b.priority.cmp(&a.priority));
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emotion_lenient_parse() {
        assert_eq!(Emotion::parse_lenient("happy"), Emotion::Happy);
        assert_eq!(Emotion::parse_lenient("HAPPY"), Emotion::Happy);
        assert_eq!(Emotion::parse_lenient("bogus"), Emotion::Neutral);
        assert_eq!(Emotion::parse_lenient(""), Emotion::Neutral);
    }

    #[test]
    fn test_action_type_lenient_parse() {
        assert_eq!(ActionType::parse_lenient("game_action"), ActionType::GameAction);
        assert_eq!(ActionType::parse_lenient("speak"), ActionType::None);
    }

    #[test]
    fn test_action_priority_capped() {
        let action = IntentAction::new(ActionType::Wave).with_priority(250);
        assert_eq!(action.priority, 100);
    }

    #[test]
    fn test_actions_by_priority() {
        let intent = Intent::new("hi", "hello")
            .with_action(IntentAction::default_blink())
            .with_action(IntentAction::new(ActionType::Wave).with_priority(60));
        let sorted = intent.actions_by_priority();
        assert_eq!(sorted[0].action_type, ActionType::Wave);
        assert_eq!(sorted[1].action_type, ActionType::Blink);
    }

    #[test]
    fn test_intent_serde_round_trip() {
        let intent = Intent::new("你好", "你好！很高兴见到你~")
            .with_emotion(Emotion::Happy)
            .with_action(IntentAction::default_blink())
            .with_source_context(SourceContext {
                source: "console_input".into(),
                importance: 0.5,
                ..Default::default()
            });
        let json = serde_json::to_value(&intent).unwrap();
        assert_eq!(json["emotion"], "happy");
        assert_eq!(json["actions"][0]["type"], "blink");

        let back: Intent = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, intent.id);
        assert_eq!(back.emotion, Emotion::Happy);
        assert_eq!(back.actions, intent.actions);
        assert_eq!(back.source_context, intent.source_context);
    }
}
