//! raidcast Agent
//!
//! Keeps a game capture session reconciled with its configuration: settings
//! flow through a staged pipeline into the capture engine, activities are
//! tracked per game flavour, and crashes or sleep/resume rebuild the session.

mod activity;
mod config;
mod console;
mod crash;
mod engine;
mod logging;
mod orchestrator;
mod pipeline;
mod process;
mod status;
mod store;

#[cfg(test)]
mod testing;

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use activity::ManualSourceFactory;
use config::{Config, SharedConfig};
use engine::SimulatedEngineFactory;
use orchestrator::{create_orchestrator_channels, Orchestrator, OrchestratorParts};
use pipeline::StagePipeline;
use store::HttpConnector;

fn main() -> Result<()> {
    let (_log_guard, log_dir) = logging::init_logging()?;
    match crash::init_crash_handler(&log_dir) {
        Ok(path) => info!("Crash log at {:?}", path),
        Err(e) => warn!("Failed to initialize crash log: {}", e),
    }

    info!("raidcast Agent starting...");

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let config = match config_arg(&args)? {
        Some(path) => Config::load_or_create(path)?,
        None => Config::load()?,
    };
    let config_path = config.config_path()?;
    info!("Configuration loaded from {:?}", config_path);

    let restart_interval = Duration::from_secs(config.recording.buffer_restart_secs.max(1));
    let shared = SharedConfig::new(config);

    let runtime = Arc::new(tokio::runtime::Runtime::new()?);
    let _enter = runtime.enter();

    let (handle, cmd_rx, status_tx, mut status_rx) = create_orchestrator_channels();

    let parts = OrchestratorParts {
        pipeline: StagePipeline::standard(Arc::new(shared.clone())),
        engine_factory: Arc::new(SimulatedEngineFactory),
        source_factory: Arc::new(ManualSourceFactory),
        store_connector: Arc::new(HttpConnector),
        restart_interval,
    };
    let orchestrator = Orchestrator::new(parts, cmd_rx, status_tx);

    let orchestrator_runtime = runtime.clone();
    let orchestrator_thread = std::thread::spawn(move || {
        orchestrator_runtime.block_on(async move {
            let mut orchestrator = orchestrator;
            if let Err(e) = orchestrator.run().await {
                error!("Orchestrator error: {}", e);
            }
        });
    });

    let ctrl_c_handle = handle.clone();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        ctrl_c_handle.shutdown();
    })
    .context("Failed to install Ctrl+C handler")?;

    let _watcher = match config::watch_config(config_path, shared.clone(), handle.clone()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("Config changes will not be picked up automatically: {:#}", e);
            None
        }
    };
    process::spawn_process_watcher(shared, handle.clone());
    console::spawn_console(handle);

    runtime.spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(update) => info!("Status: {}", update.status),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Status log skipped {} update(s)", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    info!("Press Ctrl+C or type 'quit' to exit, 'help' for commands");
    let _ = orchestrator_thread.join();

    drop(_enter);
    if let Ok(runtime) = Arc::try_unwrap(runtime) {
        // stdin reader sits on a blocking thread
        runtime.shutdown_timeout(Duration::from_secs(1));
    }

    info!("Shutdown complete");
    Ok(())
}

/// Value of `--config <path>`, if given
fn config_arg(args: &[String]) -> Result<Option<PathBuf>> {
    let Some(index) = args.iter().position(|a| a == "--config" || a == "-c") else {
        return Ok(None);
    };
    match args.get(index + 1) {
        Some(path) if !path.starts_with('-') => Ok(Some(PathBuf::from(path))),
        _ => bail!("--config requires a path"),
    }
}

fn print_help() {
    println!("raidcast Agent - Game capture session supervisor");
    println!();
    println!("USAGE:");
    println!("    raidcast-agent [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help            Print this help message");
    println!("    -c, --config <PATH>   Use this config file instead of the default");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG              Set log level (e.g., debug, info, warn)");
    println!("    RAIDCAST_LOG_PATH     Override the log directory");
}
