//! Input pipeline contract

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::message::NormalizedMessage;

/// What the pipeline manager does when a pipeline fails or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorHandling {
    /// Keep the pre-pipeline message and move on to the next pipeline.
    #[default]
    Continue,
    /// Abort processing with a structured pipeline error.
    Stop,
    /// Behave as if the pipeline dropped the message.
    Drop,
}

impl ErrorHandling {
    /// Parses a config string, falling back to `Continue` on anything
    /// unrecognized (logged by the caller).
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "stop" => ErrorHandling::Stop,
            "drop" => ErrorHandling::Drop,
            _ => ErrorHandling::Continue,
        }
    }
}

/// One filter in the ordered chain applied to every normalized message
/// before it is published.
///
/// Returning `Ok(None)` drops the message. Pipelines must not mutate the
/// incoming message; amendments are made on a copy.
#[async_trait]
pub trait InputPipeline: Send + Sync {
    fn name(&self) -> &str;

    /// Lower runs earlier.
    fn priority(&self) -> i32;

    fn enabled(&self) -> bool {
        true
    }

    fn error_handling(&self) -> ErrorHandling {
        ErrorHandling::Continue
    }

    /// Budget for one `process()` call.
    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    async fn process(
        &self,
        message: NormalizedMessage,
    ) -> Result<Option<NormalizedMessage>, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_handling_parse() {
        assert_eq!(ErrorHandling::parse_lenient("stop"), ErrorHandling::Stop);
        assert_eq!(ErrorHandling::parse_lenient("DROP"), ErrorHandling::Drop);
        assert_eq!(ErrorHandling::parse_lenient("continue"), ErrorHandling::Continue);
        assert_eq!(ErrorHandling::parse_lenient("bogus"), ErrorHandling::Continue);
    }
}
