//! AQ-Recorder: records the default input device into a CAF file.
//!
//! Usage: `aq-recorder [OUTPUT_PATH]`. Settings come from `config.toml` in
//! the platform config directory; the optional argument overrides the
//! output path.

mod app;
mod config;
mod error;
mod stop_trigger;

pub(crate) use {
    app::App,
    error::{AppError, Result as AppResult},
    stop_trigger::StopTriggers,
};

use crate::config::Config;

use std::{env, path::PathBuf};

use tracing::error;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "aq_recorder=info,aq_recorder_core=info";

/// Set to `json` for machine-readable log lines.
const LOG_FORMAT_VAR: &str = "AQ_RECORDER_LOG_FORMAT";

/// Application entry point.
fn main() {
    init_tracing();

    if let Err(e) = run() {
        error!(error = %e, "Recording failed");
        eprintln!("aq-recorder: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if env::var(LOG_FORMAT_VAR).is_ok_and(|format| format == "json") {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn run() -> AppResult<()> {
    let mut config = Config::load()?;

    if let Some(path) = env::args_os().nth(1) {
        config.recording.output_path = PathBuf::from(path);
    }
    config.validate()?;

    App { config }.run()?;

    Ok(())
}
