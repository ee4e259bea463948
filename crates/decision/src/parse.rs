//! Cleanup and parsing of LLM reply JSON
//!
//! Models wrap JSON in Markdown fences, leave trailing commas, and invent
//! enum values. Cleanup is three steps (strip fences, slice the first
//! `{` to the last `}`, drop trailing commas), then lenient coercion maps
//! unknown emotions to neutral and unknown action types to none.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use aituber_core::{ActionType, Emotion, Intent, IntentAction, NormalizedMessage, SourceContext};

static FENCE_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```(?:json)?\s*").expect("static regex"));
static FENCE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*```$").expect("static regex"));
static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("static regex"));

/// Normalizes raw LLM output into a parseable JSON string.
pub fn clean_llm_json(raw: &str) -> String {
    let mut cleaned = raw.trim().to_string();
    cleaned = FENCE_OPEN.replace(&cleaned, "").into_owned();
    cleaned = FENCE_CLOSE.replace(&cleaned, "").into_owned();
    let cleaned = cleaned.trim();

    let sliced = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(first), Some(last)) if last > first => &cleaned[first..=last],
        _ => cleaned,
    };

    TRAILING_COMMA.replace_all(sliced, "$1").into_owned()
}

/// Builds a complete intent from parsed LLM JSON.
///
/// Accepts `text` or `response_text` for the reply; missing or unknown
/// fields coerce to safe defaults and an empty action list gets the
/// default blink.
pub fn intent_from_json(parsed: &Value, message: &NormalizedMessage) -> Intent {
    let response_text = parsed
        .get("text")
        .or_else(|| parsed.get("response_text"))
        .and_then(Value::as_str)
        .unwrap_or(&message.text)
        .to_string();

    let emotion = parsed
        .get("emotion")
        .and_then(Value::as_str)
        .map(Emotion::parse_lenient)
        .unwrap_or_default();

    let mut actions = Vec::new();
    if let Some(list) = parsed.get("actions").and_then(Value::as_array) {
        for entry in list {
            let Some(type_str) = entry.get("type").and_then(Value::as_str) else {
                warn!("action without a type in LLM reply, skipping");
                continue;
            };
            let action_type = ActionType::parse_lenient(type_str);
            let priority = entry
                .get("priority")
                .and_then(Value::as_u64)
                .unwrap_or(50)
                .min(100) as u8;
            let params = entry
                .get("params")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            actions.push(IntentAction {
                action_type,
                params,
                priority,
            });
        }
    }
    if actions.is_empty() {
        actions.push(IntentAction::default_blink());
    }

    let mut intent = Intent::new(message.text.clone(), response_text).with_emotion(emotion);
    intent.actions = actions;
    intent.with_source_context(source_context_for(message))
}

/// Provenance tuple echoed into every intent.
pub fn source_context_for(message: &NormalizedMessage) -> SourceContext {
    SourceContext {
        source: message.source.clone(),
        data_type: message.data_type.clone(),
        user_id: message.user_id().map(str::to_string),
        user_nickname: message.user_name().map(str::to_string),
        importance: message.importance,
        extra: serde_json::Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_fenced_json_with_trailing_comma() {
        let raw = "```json\n{\"emotion\":\"happy\", \"actions\":[], \"response_text\":\"yo\",}\n```";
        let cleaned = clean_llm_json(raw);
        let parsed: Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(parsed["emotion"], "happy");
        assert_eq!(parsed["response_text"], "yo");
    }

    #[test]
    fn test_clean_prose_around_object() {
        let raw = "Sure! Here is the JSON you asked for: {\"text\": \"hi\"} Hope that helps.";
        assert_eq!(clean_llm_json(raw), "{\"text\": \"hi\"}");
    }

    #[test]
    fn test_clean_bare_fence() {
        let raw = "```\n{\"a\": [1, 2,],}\n```";
        let parsed: Value = serde_json::from_str(&clean_llm_json(raw)).unwrap();
        assert_eq!(parsed["a"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_malformed_reply_gets_default_blink_and_neutral() {
        let message = NormalizedMessage::new("hello", "console_input");
        let parsed: Value = serde_json::json!({
            "text": "yo",
            "emotion": "euphoric",
            "actions": [{"type": "backflip", "priority": 250}],
        });
        let intent = intent_from_json(&parsed, &message);
        assert_eq!(intent.emotion, Emotion::Neutral);
        assert_eq!(intent.actions.len(), 1);
        assert_eq!(intent.actions[0].action_type, ActionType::None);
        assert_eq!(intent.actions[0].priority, 100);
    }

    #[test]
    fn test_empty_actions_default_to_blink() {
        let message = NormalizedMessage::new("hello", "console_input");
        let parsed: Value = serde_json::json!({"emotion": "happy", "actions": [], "response_text": "yo"});
        let intent = intent_from_json(&parsed, &message);
        assert_eq!(intent.emotion, Emotion::Happy);
        assert_eq!(intent.response_text, "yo");
        assert_eq!(intent.actions.len(), 1);
        assert_eq!(intent.actions[0].action_type, ActionType::Blink);
        assert_eq!(intent.actions[0].priority, 30);
    }

    #[test]
    fn test_source_context_echo() {
        let message = NormalizedMessage::new("gift!", "bili_danmaku")
            .with_importance(0.9)
            .with_raw(aituber_core::RawUser {
                user_id: "u42".into(),
                user_name: Some("viewer".into()),
                ..Default::default()
            });
        let ctx = source_context_for(&message);
        assert_eq!(ctx.source, "bili_danmaku");
        assert_eq!(ctx.user_id.as_deref(), Some("u42"));
        assert_eq!(ctx.user_nickname.as_deref(), Some("viewer"));
        assert_eq!(ctx.importance, 0.9);
    }
}
