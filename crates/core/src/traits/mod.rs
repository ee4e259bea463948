//! Provider and pipeline contracts
//!
//! All pluggable components implement these traits so that the managers
//! can drive them without knowing concrete types:
//!
//! ```text
//! Input domain:
//!   - InputProvider: external source → stream of NormalizedMessage
//!   - InputPipeline: NormalizedMessage → NormalizedMessage | drop
//!
//! Decision domain:
//!   - DecisionProvider: NormalizedMessage → decision.intent event
//!
//! Output domain:
//!   - OutputProvider: Intent → side effect (TTS, subtitle, avatar, …)
//! ```
//!
//! Providers receive their merged configuration and the immutable service
//! context at construction time (through the registry factories); the
//! lifecycle methods themselves take no service arguments.

mod decision;
mod input;
mod output;
mod pipeline;

pub use decision::DecisionProvider;
pub use input::{InputProvider, MessageStream};
pub use output::OutputProvider;
pub use pipeline::{ErrorHandling, InputPipeline};
