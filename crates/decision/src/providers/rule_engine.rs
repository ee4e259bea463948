//! Rule-engine decision provider
//!
//! Matches messages against a local rules file (keywords, regex, metadata)
//! in priority order and replies with the matched rule's response. Needs
//! no external service, which also makes it the natural fallback tier.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use aituber_core::{DecisionProvider, Intent, IntentAction, NormalizedMessage, ProviderError};
use aituber_provider::ProviderContext;

use crate::parse::source_context_for;
use crate::providers::publish_intent;

pub const PROVIDER_NAME: &str = "rule_engine";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleEngineConfig {
    /// JSON file with a top-level `rules` array.
    pub rules_file: String,
    pub default_response: String,
    pub case_sensitive: bool,
    /// `any`: one keyword suffices; `all`: every keyword must appear.
    pub match_mode: String,
}

impl Default for RuleEngineConfig {
    fn default() -> Self {
        Self {
            rules_file: "config/rules.json".into(),
            default_response: "Hmm, tell me more?".into(),
            case_sensitive: false,
            match_mode: "any".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default)]
    pub metadata_match: Option<Map<String, Value>>,
    pub response: String,
    #[serde(default)]
    pub priority: i64,
}

#[derive(Deserialize)]
struct RulesFile {
    rules: Vec<Rule>,
}

struct CompiledRule {
    rule: Rule,
    keywords_folded: Vec<String>,
    regex: Option<Regex>,
}

pub struct RuleEngineDecisionProvider {
    config: RuleEngineConfig,
    context: Arc<ProviderContext>,
    rules: RwLock<Vec<CompiledRule>>,
    matched: AtomicU64,
    unmatched: AtomicU64,
}

impl RuleEngineDecisionProvider {
    pub fn new(config: RuleEngineConfig, context: Arc<ProviderContext>) -> Self {
        Self {
            config,
            context,
            rules: RwLock::new(Vec::new()),
            matched: AtomicU64::new(0),
            unmatched: AtomicU64::new(0),
        }
    }

    fn compile(&self, mut rules: Vec<Rule>) -> Vec<CompiledRule> {
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
        rules
            .into_iter()
            .map(|rule| {
                let keywords_folded = rule
                    .keywords
                    .iter()
                    .map(|k| {
                        if self.config.case_sensitive {
                            k.clone()
                        } else {
                            k.to_lowercase()
                        }
                    })
                    .collect();
                let regex = rule.regex.as_deref().and_then(|pattern| {
                    match RegexBuilder::new(pattern)
                        .case_insensitive(!self.config.case_sensitive)
                        .build()
                    {
                        Ok(regex) => Some(regex),
                        Err(e) => {
                            error!(rule = %rule.name, pattern, error = %e, "invalid rule regex");
                            None
                        }
                    }
                });
                CompiledRule {
                    rule,
                    keywords_folded,
                    regex,
                }
            })
            .collect()
    }

    async fn load_rules(&self) -> Result<usize, ProviderError> {
        let text = tokio::fs::read_to_string(&self.config.rules_file)
            .await
            .map_err(|e| {
                ProviderError::Init(format!(
                    "cannot read rules file {}: {e}",
                    self.config.rules_file
                ))
            })?;
        let parsed: RulesFile = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Config(format!("invalid rules file: {e}")))?;
        let compiled = self.compile(parsed.rules);
        let count = compiled.len();
        *self.rules.write() = compiled;
        Ok(count)
    }

    fn matches(&self, compiled: &CompiledRule, text: &str, message: &NormalizedMessage) -> bool {
        if !compiled.keywords_folded.is_empty() {
            let hit = if self.config.match_mode == "all" {
                compiled.keywords_folded.iter().all(|k| text.contains(k.as_str()))
            } else {
                compiled.keywords_folded.iter().any(|k| text.contains(k.as_str()))
            };
            if hit {
                return true;
            }
        }

        if let Some(regex) = &compiled.regex {
            if regex.is_match(text) {
                return true;
            }
        }

        if let Some(wanted) = &compiled.rule.metadata_match {
            return wanted
                .iter()
                .all(|(key, value)| message.metadata.get(key) == Some(value));
        }

        false
    }

    fn decide_response(&self, message: &NormalizedMessage) -> String {
        let text = if self.config.case_sensitive {
            message.text.clone()
        } else {
            message.text.to_lowercase()
        };

        for compiled in self.rules.read().iter() {
            if self.matches(compiled, &text, message) {
                self.matched.fetch_add(1, Ordering::SeqCst);
                debug!(rule = %compiled.rule.name, "rule matched");
                return compiled.rule.response.clone();
            }
        }

        self.unmatched.fetch_add(1, Ordering::SeqCst);
        self.config.default_response.clone()
    }
}

#[async_trait]
impl DecisionProvider for RuleEngineDecisionProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn start(&self) -> Result<(), ProviderError> {
        match self.load_rules().await {
            Ok(count) => info!(rules = count, "rule engine ready"),
            Err(e) => {
                // Still usable: every message gets the default response.
                warn!(error = %e, "failed to load rules, running with an empty rule set");
            }
        }
        Ok(())
    }

    async fn decide(&self, message: NormalizedMessage) {
        let response = self.decide_response(&message);
        let mut intent = Intent::new(message.text.clone(), response)
            .with_source_context(source_context_for(&message))
            .with_metadata("parser", "rule_engine".into());
        intent.actions.push(IntentAction::default_blink());
        publish_intent(self.context.event_bus(), intent, PROVIDER_NAME).await;
    }

    async fn cleanup(&self) {
        info!(
            matched = self.matched.load(Ordering::SeqCst),
            unmatched = self.unmatched.load(Ordering::SeqCst),
            "rule engine cleaned up"
        );
    }
}
