pub mod config;
pub mod db;
pub mod pipeline;
pub mod watchdog;

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use config::{AppConfig, ConfigError};
use pipeline::{BatchSummary, PipelineError, StopReason};
use watchdog::{start_power_watchdog, SystemPowerSource, WatchdogTiming};

/// Exit status used when a second interrupt forces an immediate stop.
const FORCED_EXIT_CODE: i32 = 130;

/// Errors that end the process with a failure status.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Cannot install interrupt handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    match run_batch() {
        Ok(summary) => {
            println!("{summary}");
            match summary.stop {
                StopReason::Completed | StopReason::Interrupted => ExitCode::SUCCESS,
                StopReason::FailureLimit => ExitCode::FAILURE,
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Batch aborted");
            ExitCode::FAILURE
        }
    }
}

fn run_batch() -> Result<BatchSummary, AppError> {
    let config = AppConfig::load()?;
    let cancel = install_interrupt_handler()?;

    // Held for the whole batch; dropping it stops the polling thread.
    let _watchdog = config.watchdog.enabled.then(|| {
        start_power_watchdog(
            Box::new(SystemPowerSource),
            WatchdogTiming::from(&config.watchdog),
            Box::new(|| {
                std::process::exit(1);
            }),
        )
    });

    let summary = pipeline::run_full_batch(&config, &cancel)?;
    tracing::info!(
        stop = ?summary.stop,
        seen = summary.seen,
        accepted = summary.accepted,
        duration_ms = summary.duration_ms,
        "Batch finished"
    );
    Ok(summary)
}

/// First Ctrl-C asks the batch to stop after the current title; a second
/// one exits immediately.
fn install_interrupt_handler() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();

    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            eprintln!("Interrupted again, exiting now");
            std::process::exit(FORCED_EXIT_CODE);
        }
        eprintln!("Interrupt received, finishing the current title (Ctrl-C again to force)");
    })?;

    Ok(cancel)
}
