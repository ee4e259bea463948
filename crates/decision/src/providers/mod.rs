//! Built-in decision providers

mod keyword_action;
mod llm;
mod replay;
mod rule_engine;

pub use keyword_action::{ActionRule, KeywordActionConfig, KeywordActionDecisionProvider};
pub use llm::{LlmDecisionConfig, LlmDecisionProvider};
pub use replay::{ReplayConfig, ReplayDecisionProvider};
pub use rule_engine::{Rule, RuleEngineConfig, RuleEngineDecisionProvider};

use tracing::error;

use aituber_core::Intent;
use aituber_events::{names, EmitOptions, EventBus, EventPayload, IntentPayload};

/// Publishes one `decision.intent` event (fire-and-forget).
pub(crate) async fn publish_intent(bus: &EventBus, intent: Intent, provider: &str) {
    let payload = EventPayload::Intent(IntentPayload::from_intent(intent, provider));
    if let Err(e) = bus
        .emit(names::DECISION_INTENT, payload, provider, EmitOptions::default())
        .await
    {
        error!(provider, error = %e, "failed to publish intent");
    }
}
