//! nextgsim MME EMM daemon
//!
//! This is the main binary for the MME identification service. It implements:
//! - CLI argument parsing
//! - Configuration loading and validation
//! - Task spawning and graceful shutdown
//!
//! # Usage
//!
//! ```bash
//! nr-mme -c config/mme.yaml
//! nr-mme -c config/mme.yaml -l debug
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use nextgsim_common::config::MmeConfig;
use nextgsim_common::logging::{init_logging, init_logging_with_filter, LogLevel};
use nextgsim_mme::{
    EmmContextStore, EmmTask, IdentificationController, MmeAppRegistry, MmeAppTask,
    MmeTaskBase, NasTimerService, TaskError,
};

/// nextgsim MME - EMM identification service
#[derive(Parser, Debug)]
#[command(name = "nr-mme")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the MME configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config_file: String,

    /// Log level (trace, debug, info, warn, error); overrides `log_filter`
    #[arg(short = 'l', long = "log-level", value_name = "LEVEL")]
    log_level: Option<LogLevel>,
}

/// Loads and validates the MME configuration.
fn load_config(path: &str) -> Result<MmeConfig> {
    MmeConfig::from_yaml_file(path)
        .with_context(|| format!("Failed to load configuration file: {path}"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args.config_file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("nr-mme: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match (args.log_level, config.log_filter.as_deref()) {
        (Some(level), _) => init_logging(level),
        (None, Some(filter)) => init_logging_with_filter(filter),
        (None, None) => init_logging(LogLevel::default()),
    }

    match run_mme(config).await {
        Ok(()) => {
            info!("MME exited successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("MME failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Wires the stores, timer service and tasks, then runs until Ctrl-C.
async fn run_mme(config: MmeConfig) -> Result<()> {
    let nas_config = config.nas.clone();
    let (base, emm_rx, app_rx) = MmeTaskBase::new(config);

    let store = Arc::new(EmmContextStore::new());
    let registry = Arc::new(MmeAppRegistry::new());
    let timers = Arc::new(NasTimerService::new(base.emm_tx.clone()));

    let controller = IdentificationController::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&timers),
        base.app_tx.clone(),
        nas_config,
    );
    let emm_join = EmmTask::new(controller).spawn(emm_rx);
    let app_join = MmeAppTask::new(Arc::clone(&store), Arc::clone(&registry), Arc::clone(&timers))
        .spawn(app_rx);

    info!(
        t3470_secs = base.config.nas.t3470_interval_secs,
        max_retransmissions = base.config.nas.identification_max_retransmissions,
        "MME started, press Ctrl-C to stop"
    );
    signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("shutting down");

    timers.stop_all();
    base.emm_tx
        .shutdown()
        .await
        .map_err(|_| TaskError::ChannelClosed("EMM"))?;
    emm_join.await.map_err(|e| TaskError::Failed {
        task: "EMM",
        message: e.to_string(),
    })?;
    base.app_tx
        .shutdown()
        .await
        .map_err(|_| TaskError::ChannelClosed("MME_APP"))?;
    app_join.await.map_err(|e| TaskError::Failed {
        task: "MME_APP",
        message: e.to_string(),
    })?;
    Ok(())
}
