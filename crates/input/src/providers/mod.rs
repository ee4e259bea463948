//! Built-in input providers

mod console;
mod mock_danmaku;

pub use console::{ConsoleInputConfig, ConsoleInputProvider};
pub use mock_danmaku::{MockDanmakuConfig, MockDanmakuProvider};
