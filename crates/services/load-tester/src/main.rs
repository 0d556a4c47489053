//! RTSP Load Tester Binary
//!
//! Publishes many concurrent video streams to an RTSP server until the
//! configured duration elapses, memory runs short, or the process is signalled.
//!
//! # Usage
//!
//! ```bash
//! # Run with the default configuration
//! ./rtsp-load-tester -c config/config.yaml
//!
//! # Unattended (containers, CI)
//! ./rtsp-load-tester --skip-prompt
//!
//! # Only check that the encoder is installed
//! ./rtsp-load-tester --validate
//! ```

mod logging;
mod setup;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rtsp_loadtest_core::config::MonitoringConfig;
use rtsp_loadtest_core::{LoadTestConfig, LoadTestOrchestrator, TerminationReason};
use tokio::signal;

/// RTSP Load Tester
///
/// Publish multiple video streams to an RTSP server for pipeline load testing.
#[derive(Parser)]
#[command(name = "rtsp-load-tester")]
#[command(author, version, about)]
struct Args {
    /// Path to the configuration file (YAML, or TOML by extension)
    #[arg(short, long, default_value = "config/config.yaml")]
    config: PathBuf,

    /// Validate setup and exit
    #[arg(long)]
    validate: bool,

    /// Skip the "is the RTSP server running?" confirmation
    #[arg(long)]
    skip_prompt: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup::print_banner();

    if args.validate {
        let monitoring = MonitoringConfig {
            log_to_file: false,
            ..MonitoringConfig::default()
        };
        let _log_guard = logging::init(&monitoring, args.verbose, args.json)?;
        let binary = LoadTestConfig::from_file(&args.config)
            .map(|config| config.publisher.encoder_binary)
            .unwrap_or_else(|_| "ffmpeg".to_string());
        setup::validate_encoder(&binary).await?;
        tracing::info!("Setup validation complete");
        return Ok(());
    }

    let config = LoadTestConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    let _log_guard = logging::init(&config.monitoring, args.verbose, args.json)?;
    tracing::info!("Loaded configuration from: {}", args.config.display());

    setup::validate_encoder(&config.publisher.encoder_binary).await?;
    setup::check_sources(&config)?;

    if args.skip_prompt {
        tracing::info!("Skipping server confirmation prompt (--skip-prompt flag set)");
    } else if !setup::confirm_server_running().await? {
        tracing::warn!("Please start the RTSP server before running the load test");
        return Ok(());
    }

    let mut orchestrator = LoadTestOrchestrator::new(config)?;
    orchestrator.create_publishers().await?;
    setup::print_stream_info(&orchestrator.get_stream_urls());

    let shutdown = orchestrator.shutdown_handle();
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received, stopping load test...");
        shutdown.trigger(TerminationReason::Signal);
    });

    let result = orchestrator.start().await;
    if let Err(e) = &result {
        tracing::error!("Error running load test: {}", e);
    }

    // No-op if the run already produced its report
    orchestrator.stop().await;
    signal_task.abort();

    result?;
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
