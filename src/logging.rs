/*!
 * Logging and tracing initialization
 */

use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::ConductorConfig;
use crate::error::{ConductorError, Result};

/// Crates whose events pass the default filter
const LOG_TARGETS: [&str; 2] = ["conductor", "conductor_core_breaker"];

/// Where diagnostic output goes. Stdout is kept for command output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    /// Compact human-readable lines on stderr
    Stderr,
    /// JSON lines in a file
    File(PathBuf),
}

impl LogDestination {
    pub fn from_config(config: &ConductorConfig) -> Self {
        match config.log_file {
            Some(ref path) => LogDestination::File(path.clone()),
            None => LogDestination::Stderr,
        }
    }
}

/// Initialize structured logging based on configuration
pub fn init_logging(config: &ConductorConfig) -> Result<()> {
    let env_filter = build_filter(effective_level(config))?;

    match LogDestination::from_config(config) {
        LogDestination::File(log_path) => init_file_logging(&log_path, env_filter),
        LogDestination::Stderr => init_stderr_logging(env_filter),
    }
}

/// Level after applying `verbose`
pub fn effective_level(config: &ConductorConfig) -> Level {
    if config.verbose {
        Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    }
}

/// `RUST_LOG` wins; otherwise both Conductor crates log at `level`
fn build_filter(level: Level) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(level)))
        .map_err(|e| ConductorError::Config(format!("Failed to create log filter: {}", e)))
}

fn default_directives(level: Level) -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialize logging to stderr
fn init_stderr_logging(env_filter: EnvFilter) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| ConductorError::Config(format!("Failed to install logger: {}", e)))
}

/// Initialize JSON logging to a file
fn init_file_logging(log_path: &Path, env_filter: EnvFilter) -> Result<()> {
    let file = File::create(log_path)
        .map_err(|e| ConductorError::Config(format!("Failed to create log file: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| ConductorError::Config(format!("Failed to install logger: {}", e)))
}

/// Initialize logging with custom format for testing
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directives(Level::DEBUG)));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}
