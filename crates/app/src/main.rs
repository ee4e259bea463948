//! Process entrypoint
//!
//! Bootstraps logging, assembles the orchestrator from the config
//! directory (`AITUBER_HOME` or the working directory), and runs until
//! ctrl-c. Exit code 0 on clean shutdown, 1 on initialization failure.

use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use aituber::Orchestrator;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let base_dir = std::env::var("AITUBER_HOME").unwrap_or_else(|_| ".".to_string());
    info!(base_dir = %base_dir, version = env!("CARGO_PKG_VERSION"), "aituber starting");

    let orchestrator = match Orchestrator::build(&base_dir) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!(error = ?e, "failed to assemble orchestrator");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = orchestrator.start().await {
        error!(error = ?e, "failed to start orchestrator");
        orchestrator.shutdown("startup failure").await;
        return ExitCode::FAILURE;
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("ctrl-c received"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }

    orchestrator.shutdown("signal").await;
    ExitCode::SUCCESS
}
