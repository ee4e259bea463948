//! Input domain: concurrent provider supervision and message pipelines
//!
//! Each enabled input provider runs in its own supervised task pulling
//! normalized messages from `stream()`, passing them through the pipeline
//! chain, and publishing `data.message` events. A failing provider is
//! isolated; its siblings keep running.

pub mod manager;
pub mod pipeline;
pub mod pipelines;
pub mod providers;

pub use manager::InputProviderManager;
pub use pipeline::{InputPipelineManager, PipelineReport};
pub use pipelines::{
    MessageLogConfig, MessageLogPipeline, PipelineCommonConfig, RateLimitConfig,
    RateLimitPipeline, SimilarityFilterConfig, SimilarityFilterPipeline,
};
pub use providers::{ConsoleInputProvider, MockDanmakuProvider};
