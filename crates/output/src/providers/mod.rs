//! Built-in output providers

mod debug_console;
mod subtitle;
mod tts;

pub use debug_console::{DebugConsoleConfig, DebugConsoleOutputProvider};
pub use subtitle::{SubtitleConfig, SubtitleOutputProvider};
pub use tts::{Synthesizer, ToneSynthesizer, TtsConfig, TtsOutputProvider};
