//! The input pipeline manager
//!
//! Runs every enabled pipeline over each message in ascending priority
//! order, with a per-pipeline timeout and the pipeline's configured error
//! policy. The manager owns the execution statistics; pipelines only
//! implement `process`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use aituber_core::{ErrorHandling, InputPipeline, NormalizedMessage, PipelineError, PipelineStats};

/// Stats plus static metadata for one pipeline, as reported to callers.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub priority: i32,
    pub enabled: bool,
    pub stats: PipelineStats,
}

#[derive(Default)]
struct PipelineSet {
    pipelines: Vec<Arc<dyn InputPipeline>>,
    sorted: bool,
}

/// Ordered chain of filters applied to each normalized message before it
/// is published.
#[derive(Default)]
pub struct InputPipelineManager {
    set: Mutex<PipelineSet>,
    stats: Mutex<HashMap<String, PipelineStats>>,
}

impl InputPipelineManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, pipeline: Arc<dyn InputPipeline>) {
        info!(
            pipeline = pipeline.name(),
            priority = pipeline.priority(),
            enabled = pipeline.enabled(),
            "input pipeline registered"
        );
        let mut set = self.set.lock();
        set.pipelines.push(pipeline);
        set.sorted = false;
    }

    pub fn pipeline_count(&self) -> usize {
        self.set.lock().pipelines.len()
    }

    fn sorted_pipelines(&self) -> Vec<Arc<dyn InputPipeline>> {
        let mut set = self.set.lock();
        if !set.sorted {
            set.pipelines.sort_by_key(|p| p.priority());
            set.sorted = true;
            let order: Vec<String> = set
                .pipelines
                .iter()
                .map(|p| format!("{}({})", p.name(), p.priority()))
                .collect();
            debug!(order = order.join(", "), "input pipelines sorted");
        }
        set.pipelines.clone()
    }

    /// Runs one message through the chain.
    ///
    /// `Ok(None)` means some pipeline dropped the message. `Err` only
    /// occurs for a pipeline whose policy is `stop`.
    pub async fn process(
        &self,
        message: NormalizedMessage,
    ) -> Result<Option<NormalizedMessage>, PipelineError> {
        let pipelines = self.sorted_pipelines();
        if pipelines.is_empty() {
            return Ok(Some(message));
        }

        let mut current = message;
        for pipeline in pipelines {
            if !pipeline.enabled() {
                continue;
            }
            let name = pipeline.name().to_string();
            let start = Instant::now();
            let outcome =
                tokio::time::timeout(pipeline.timeout(), pipeline.process(current.clone())).await;
            let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

            match outcome {
                Ok(Ok(Some(next))) => {
                    self.stats
                        .lock()
                        .entry(name.clone())
                        .or_default()
                        .record_processed(duration_ms);
                    debug!(pipeline = %name, duration_ms, "pipeline passed message");
                    current = next;
                }
                Ok(Ok(None)) => {
                    let mut stats = self.stats.lock();
                    let entry = stats.entry(name.clone()).or_default();
                    entry.record_processed(duration_ms);
                    entry.dropped_count += 1;
                    debug!(pipeline = %name, duration_ms, "pipeline dropped message");
                    return Ok(None);
                }
                Ok(Err(cause)) => {
                    error!(pipeline = %name, error = %cause, "input pipeline failed");
                    if let Some(result) = self.apply_error_policy(&pipeline, &name, cause)? {
                        return Ok(result);
                    }
                    // Continue policy: keep the pre-pipeline message.
                }
                Err(_elapsed) => {
                    let timeout_secs = pipeline.timeout().as_secs_f64();
                    error!(pipeline = %name, timeout_secs, "input pipeline timed out");
                    let cause = PipelineError::Timeout {
                        pipeline: name.clone(),
                        timeout_secs,
                    };
                    if let Some(result) = self.apply_error_policy(&pipeline, &name, cause)? {
                        return Ok(result);
                    }
                }
            }
        }

        Ok(Some(current))
    }

    /// Records the error and maps the policy onto the control flow:
    /// `Err(_)` aborts (stop), `Ok(Some(None))` drops, `Ok(None)` keeps
    /// going with the pre-pipeline message.
    #[allow(clippy::type_complexity)]
    fn apply_error_policy(
        &self,
        pipeline: &Arc<dyn InputPipeline>,
        name: &str,
        cause: PipelineError,
    ) -> Result<Option<Option<NormalizedMessage>>, PipelineError> {
        {
            let mut stats = self.stats.lock();
            stats.entry(name.to_string()).or_default().error_count += 1;
        }
        match pipeline.error_handling() {
            ErrorHandling::Stop => Err(cause),
            ErrorHandling::Drop => {
                let mut stats = self.stats.lock();
                stats.entry(name.to_string()).or_default().dropped_count += 1;
                Ok(Some(None))
            }
            ErrorHandling::Continue => Ok(None),
        }
    }

    /// Execution statistics plus metadata per registered pipeline.
    pub fn reports(&self) -> HashMap<String, PipelineReport> {
        let stats = self.stats.lock();
        self.set
            .lock()
            .pipelines
            .iter()
            .map(|p| {
                (
                    p.name().to_string(),
                    PipelineReport {
                        priority: p.priority(),
                        enabled: p.enabled(),
                        stats: stats.get(p.name()).copied().unwrap_or_default(),
                    },
                )
            })
            .collect()
    }

    pub fn reset_stats(&self) {
        self.stats.lock().clear();
    }
}
