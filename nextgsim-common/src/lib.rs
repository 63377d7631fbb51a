//! Common types and utilities for nextgsim
//!
//! This crate provides shared identity types, configuration structures, and
//! logging utilities used across the nextgsim MME crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{MmeConfig, NasConfig};
pub use error::Error;
pub use logging::{init_logging, init_logging_with_filter, log_emm_primitive, Direction, LogLevel};
pub use types::*;
