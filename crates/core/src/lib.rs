//! Core types and traits for the VTuber orchestrator
//!
//! This crate provides the foundational pieces used across all other crates:
//! - The three-domain data model (NormalizedMessage → Intent)
//! - Provider traits for the pluggable input/decision/output layers
//! - The input pipeline contract and its statistics
//! - Audio chunk types shared with the streaming channel
//! - Error types

pub mod audio;
pub mod error;
pub mod intent;
pub mod message;
pub mod stats;
pub mod time;
pub mod traits;

pub use audio::{AudioChunk, AudioMetadata};
pub use error::{PipelineError, ProviderError};
pub use intent::{ActionType, Emotion, Intent, IntentAction, SourceContext};
pub use message::{DataType, NormalizedMessage, RawData, RawUser};
pub use stats::PipelineStats;
pub use time::unix_now;

pub use traits::{
    DecisionProvider, ErrorHandling, InputPipeline, InputProvider, MessageStream, OutputProvider,
};
