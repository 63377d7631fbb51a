//! Logging infrastructure for nextgsim
//!
//! This module provides configurable logging using the `tracing` crate and
//! helpers for logging EMM-SAP primitives exchanged between NAS sublayers.

use std::fmt;
use tracing::Level;

use crate::types::MmeUeS1apId;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Log level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Trace level - most verbose
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level - least verbose
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("unknown log level: {s}")),
        }
    }
}

/// Initialize the tracing subscriber with the specified log level.
///
/// This should be called once at application startup. The log level can be
/// overridden by the `RUST_LOG` environment variable.
///
/// # Example
///
/// ```no_run
/// use nextgsim_common::logging::{init_logging, LogLevel};
///
/// init_logging(LogLevel::Debug);
/// ```
pub fn init_logging(level: LogLevel) {
    init_logging_with_filter(&level.to_string());
}

/// Initialize logging with a custom filter string.
///
/// Allows fine-grained control over which modules log at which levels.
///
/// # Example
///
/// ```no_run
/// use nextgsim_common::logging::init_logging_with_filter;
///
/// // Set default to info, but enable debug for the EMM layer
/// init_logging_with_filter("info,nextgsim_mme::nas=debug");
/// ```
pub fn init_logging_with_filter(filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    // A second initialisation (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_span_events(FmtSpan::NONE)
        .try_init();
}

/// Primitive direction for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Primitive received by the EMM layer
    Rx,
    /// Primitive emitted by the EMM layer
    Tx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Rx => write!(f, "RX"),
            Direction::Tx => write!(f, "TX"),
        }
    }
}

/// Log an EMM-SAP primitive at debug level.
///
/// # Arguments
///
/// * `direction` - Primitive direction (RX or TX)
/// * `primitive` - Primitive name (e.g., "EMMREG_COMMON_PROC_CNF")
/// * `ue_id` - MME UE S1AP identifier the primitive refers to
///
/// # Example
///
/// ```
/// use nextgsim_common::logging::{log_emm_primitive, Direction};
/// use nextgsim_common::MmeUeS1apId;
///
/// log_emm_primitive(Direction::Tx, "EMMAS_SECURITY_REQ", MmeUeS1apId(42));
/// ```
pub fn log_emm_primitive(direction: Direction, primitive: &str, ue_id: MmeUeS1apId) {
    tracing::debug!(
        direction = %direction,
        primitive = primitive,
        ue_id = %ue_id,
        "{} EMM-SAP {}",
        direction,
        primitive
    );
}
