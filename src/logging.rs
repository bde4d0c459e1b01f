//! Replay-aware logging macros and subscriber setup.
//!
//! The `stress_*` macros take a [`Collaborators`](crate::Collaborators) and
//! stay silent while the segment is replaying recorded history, so a replayed
//! iteration does not log twice.

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[macro_export]
macro_rules! stress_info {
    ($env:expr, $($arg:tt)+) => {{
        if $env.is_logging_enabled() {
            ::tracing::info!(workflow_id = %$env.info.workflow_id(), $($arg)+);
        }
    }};
}

#[macro_export]
macro_rules! stress_warn {
    ($env:expr, $($arg:tt)+) => {{
        if $env.is_logging_enabled() {
            ::tracing::warn!(workflow_id = %$env.info.workflow_id(), $($arg)+);
        }
    }};
}

#[macro_export]
macro_rules! stress_debug {
    ($env:expr, $($arg:tt)+) => {{
        if $env.is_logging_enabled() {
            ::tracing::debug!(workflow_id = %$env.info.workflow_id(), $($arg)+);
        }
    }};
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured JSON for log aggregators
    Json,
    /// Human-readable multi-field output
    Pretty,
    /// Single-line output
    #[default]
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Level for this crate's targets; everything else logs at `warn`.
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_level(),
        }
    }
}

fn default_filter_expression(level: &str) -> String {
    format!("warn,throughput_stress={level}")
}

/// Install the global subscriber. `RUST_LOG` wins over `config.level`.
pub fn init_logging(config: &LoggingConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter_expression(&config.level)));

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| format!("Failed to initialize JSON logging: {e}")),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .map_err(|e| format!("Failed to initialize pretty logging: {e}")),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
            .map_err(|e| format!("Failed to initialize compact logging: {e}")),
    }
}
