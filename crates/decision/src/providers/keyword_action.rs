//! Keyword-action decision provider
//!
//! Maps chat keywords straight to avatar actions (hotkeys, expressions)
//! with per-rule cooldowns. Only the first matching rule fires, and a
//! message with no match produces no intent. This provider is a sparse
//! trigger layer, usually run next to a conversational provider through
//! an extension.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use aituber_core::{
    unix_now, ActionType, DecisionProvider, Intent, IntentAction, NormalizedMessage, ProviderError,
};
use aituber_provider::ProviderContext;

use crate::parse::source_context_for;
use crate::providers::publish_intent;

pub const PROVIDER_NAME: &str = "keyword_action";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionRule {
    pub name: String,
    pub enabled: bool,
    pub keywords: Vec<String>,
    /// `exact`, `startswith`, `endswith` or `anywhere`.
    pub match_mode: String,
    /// Seconds before this rule may fire again; 0 uses the global value.
    pub cooldown: f64,
    pub action_type: String,
    pub action_params: Map<String, Value>,
    pub priority: u8,
}

impl Default for ActionRule {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            keywords: Vec::new(),
            match_mode: "anywhere".into(),
            cooldown: 0.0,
            action_type: "none".into(),
            action_params: Map::new(),
            priority: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordActionConfig {
    pub actions: Vec<ActionRule>,
    pub global_cooldown: f64,
    /// Response text on a match; empty means "triggered: <rule>".
    pub default_response: String,
}

impl Default for KeywordActionConfig {
    fn default() -> Self {
        Self {
            actions: Vec::new(),
            global_cooldown: 1.0,
            default_response: String::new(),
        }
    }
}

pub struct KeywordActionDecisionProvider {
    config: KeywordActionConfig,
    context: Arc<ProviderContext>,
    last_triggered: Mutex<HashMap<String, f64>>,
    match_count: AtomicU64,
    cooldown_skips: AtomicU64,
}

impl KeywordActionDecisionProvider {
    pub fn new(config: KeywordActionConfig, context: Arc<ProviderContext>) -> Self {
        Self {
            config,
            context,
            last_triggered: Mutex::new(HashMap::new()),
            match_count: AtomicU64::new(0),
            cooldown_skips: AtomicU64::new(0),
        }
    }

    fn keyword_hit(text: &str, rule: &ActionRule) -> bool {
        match rule.match_mode.as_str() {
            "exact" => rule.keywords.iter().any(|k| text == k),
            "startswith" => rule.keywords.iter().any(|k| text.starts_with(k.as_str())),
            "endswith" => rule.keywords.iter().any(|k| text.ends_with(k.as_str())),
            _ => rule.keywords.iter().any(|k| text.contains(k.as_str())),
        }
    }

    /// First matching rule that is enabled and off cooldown.
    fn match_rule_at(&self, text: &str, now: f64) -> Option<ActionRule> {
        let mut rules: Vec<&ActionRule> = self.config.actions.iter().filter(|r| r.enabled).collect();
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));

        let mut last = self.last_triggered.lock();
        for rule in rules {
            if !Self::keyword_hit(text, rule) {
                continue;
            }
            let cooldown = if rule.cooldown > 0.0 {
                rule.cooldown
            } else {
                self.config.global_cooldown
            };
            if now - last.get(&rule.name).copied().unwrap_or(f64::MIN) < cooldown {
                debug!(rule = %rule.name, "action rule on cooldown");
                self.cooldown_skips.fetch_add(1, Ordering::SeqCst);
                continue;
            }
            last.insert(rule.name.clone(), now);
            self.match_count.fetch_add(1, Ordering::SeqCst);
            return Some(rule.clone());
        }
        None
    }
}

#[async_trait]
impl DecisionProvider for KeywordActionDecisionProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn start(&self) -> Result<(), ProviderError> {
        let enabled = self.config.actions.iter().filter(|a| a.enabled).count();
        info!(
            enabled,
            total = self.config.actions.len(),
            global_cooldown = self.config.global_cooldown,
            "keyword action provider ready"
        );
        Ok(())
    }

    async fn decide(&self, message: NormalizedMessage) {
        let text = message.text.trim();
        if text.is_empty() {
            return;
        }

        let Some(rule) = self.match_rule_at(text, unix_now()) else {
            return;
        };
        info!(rule = %rule.name, "keyword action triggered");

        let response_text = if self.config.default_response.is_empty() {
            format!("triggered: {}", rule.name)
        } else {
            self.config.default_response.clone()
        };

        let action = IntentAction {
            action_type: ActionType::parse_lenient(&rule.action_type),
            params: rule.action_params.clone(),
            priority: rule.priority.min(100),
        };
        let mut intent = Intent::new(message.text.clone(), response_text)
            .with_source_context(source_context_for(&message))
            .with_metadata("parser", PROVIDER_NAME.into())
            .with_metadata("rule", rule.name.clone().into());
        intent.actions.push(action);

        publish_intent(self.context.event_bus(), intent, PROVIDER_NAME).await;
    }

    async fn cleanup(&self) {
        info!(
            matches = self.match_count.load(Ordering::SeqCst),
            cooldown_skips = self.cooldown_skips.load(Ordering::SeqCst),
            "keyword action provider cleaned up"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aituber_events::EventBus;

    fn provider(rules: Vec<ActionRule>) -> KeywordActionDecisionProvider {
        KeywordActionDecisionProvider::new(
            KeywordActionConfig {
                actions: rules,
                global_cooldown: 1.0,
                default_response: String::new(),
            },
            Arc::new(ProviderContext::new(EventBus::new())),
        )
    }

    fn smile_rule(cooldown: f64) -> ActionRule {
        ActionRule {
            name: "smile".into(),
            keywords: vec!["smile".into(), "😊".into()],
            cooldown,
            action_type: "hotkey".into(),
            priority: 60,
            ..Default::default()
        }
    }

    #[test]
    fn test_anywhere_match_and_cooldown() {
        let provider = provider(vec![smile_rule(3.0)]);
        assert!(provider.match_rule_at("please smile for us", 0.0).is_some());
        // Within cooldown: skipped.
        assert!(provider.match_rule_at("smile again", 1.0).is_none());
        // After cooldown: fires again.
        assert!(provider.match_rule_at("smile again", 3.5).is_some());
        assert_eq!(provider.cooldown_skips.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exact_match_mode() {
        let rule = ActionRule {
            name: "hi".into(),
            keywords: vec!["hello".into()],
            match_mode: "exact".into(),
            action_type: "wave".into(),
            ..Default::default()
        };
        let provider = provider(vec![rule]);
        assert!(provider.match_rule_at("hello", 0.0).is_some());
        assert!(provider.match_rule_at("hello there", 10.0).is_none());
    }

    #[test]
    fn test_priority_picks_higher_rule() {
        let low = ActionRule {
            name: "low".into(),
            keywords: vec!["go".into()],
            priority: 10,
            ..Default::default()
        };
        let high = ActionRule {
            name: "high".into(),
            keywords: vec!["go".into()],
            priority: 90,
            ..Default::default()
        };
        let provider = provider(vec![low, high]);
        assert_eq!(provider.match_rule_at("go go go", 0.0).unwrap().name, "high");
    }

    #[test]
    fn test_disabled_rule_never_fires() {
        let mut rule = smile_rule(0.0);
        rule.enabled = false;
        let provider = provider(vec![rule]);
        assert!(provider.match_rule_at("smile", 0.0).is_none());
    }

    #[tokio::test]
    async fn test_no_match_publishes_nothing() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let count_clone = Arc::clone(&count);
        bus.on(aituber_events::names::DECISION_INTENT, 100, move |_ctx| {
            let count = Arc::clone(&count_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let provider = KeywordActionDecisionProvider::new(
            KeywordActionConfig {
                actions: vec![smile_rule(0.0)],
                ..Default::default()
            },
            Arc::new(ProviderContext::new(bus.clone())),
        );
        provider.decide(NormalizedMessage::new("nothing relevant", "test")).await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
