//! Provider registry and dependency context
//!
//! [`ProviderContext`] is the immutable bundle of service handles handed
//! to every provider at construction. [`ProviderRegistry`] maps provider
//! names to factories per layer; it is populated once at startup by an
//! explicit registration module and treated as read-only afterwards
//! (tests reset it with [`ProviderRegistry::clear_all`]).

pub mod context;
pub mod registry;

pub use context::ProviderContext;
pub use registry::{ProviderRegistry, RegistryInfo};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    /// No factory under that name. The message enumerates what exists so
    /// config typos are self-diagnosing.
    #[error("unknown {layer} provider: '{name}'. Available providers: {available}")]
    UnknownProvider {
        layer: &'static str,
        name: String,
        available: String,
    },

    /// The factory rejected its config or failed to build the provider.
    #[error("failed to construct provider '{name}': {message}")]
    Construction { name: String, message: String },
}
