//! Decision domain: one active provider turning messages into intents
//!
//! The [`DecisionProviderManager`] bridges `data.message` events to the
//! active provider's fire-and-forget `decide()`, supports runtime
//! switching with rollback, and announces connect/disconnect on the bus.
//! Every built-in provider degrades gracefully: an unreachable backend
//! produces a fallback intent, never a stalled pipeline.

pub mod manager;
pub mod parse;
pub mod providers;

pub use manager::DecisionProviderManager;
pub use providers::{
    KeywordActionDecisionProvider, LlmDecisionProvider, ReplayDecisionProvider,
    RuleEngineDecisionProvider,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecisionError {
    #[error(transparent)]
    Registry(#[from] aituber_provider::RegistryError),

    /// The provider was built but its `start()` failed; previous state
    /// has been restored.
    #[error("could not initialize decision provider '{provider}': {message}")]
    Connection { provider: String, message: String },
}
