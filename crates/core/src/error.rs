//! Shared error types for the provider and pipeline layers
//!
//! Domain-specific errors (config, registry, events, extensions) live in
//! their own crates; these are the two kinds that cross crate boundaries
//! through the provider traits.

use thiserror::Error;

/// Errors raised by providers across all three layers.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// `start()` could not initialize internal state.
    #[error("initialization failed: {0}")]
    Init(String),

    /// `start()` could not open an external resource (socket, device).
    #[error("connection failed: {0}")]
    Connection(String),

    /// Failure during `execute()` / `decide()` / `stream()`.
    #[error("runtime failure: {0}")]
    Runtime(String),

    /// The provider rejected its merged configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The provider did not finish within its configured timeout.
    #[error("timed out after {0:.1}s")]
    Timeout(f64),
}

/// Error wrapper produced by the input pipeline chain.
///
/// Carries the pipeline name so that callers can attribute the failure
/// without inspecting the cause chain.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("[{pipeline}] processing timed out after {timeout_secs:.1}s")]
    Timeout { pipeline: String, timeout_secs: f64 },

    #[error("[{pipeline}] {message}")]
    Failed {
        pipeline: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl PipelineError {
    /// Name of the pipeline that produced this error.
    pub fn pipeline_name(&self) -> &str {
        match self {
            PipelineError::Timeout { pipeline, .. } => pipeline,
            PipelineError::Failed { pipeline, .. } => pipeline,
        }
    }
}
