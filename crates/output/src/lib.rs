//! Output domain: fan-out of intents to every enabled renderer
//!
//! The [`OutputProviderManager`] subscribes to `decision.intent` and
//! dispatches each intent to all enabled output providers, in parallel
//! by default or serially when configured. Each provider renders under its
//! own timeout; outcomes surface as `render.completed` / `render.failed`
//! events rather than errors.

pub mod manager;
pub mod providers;

pub use manager::{OutputDomainConfig, OutputProviderManager};
pub use providers::{
    DebugConsoleOutputProvider, SubtitleOutputProvider, Synthesizer, ToneSynthesizer,
    TtsOutputProvider,
};
