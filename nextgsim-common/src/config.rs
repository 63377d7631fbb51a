//! Configuration structures for the MME
//!
//! YAML-backed configuration for the `nr-mme` binary and the EMM layer.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default T3470 interval in seconds (3GPP TS 24.301 Table 10.2.2).
pub const DEFAULT_T3470_INTERVAL_SECS: u64 = 6;

/// Default number of T3470 expiries before the identification procedure aborts.
pub const DEFAULT_IDENTIFICATION_MAX_RETRANSMISSIONS: u32 = 5;

/// Default retry interval of a specific procedure re-armed after a collision.
pub const DEFAULT_SPECIFIC_RETRY_INTERVAL_SECS: u64 = 1;

/// Default capacity of the task message channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

fn default_t3470_interval_secs() -> u64 {
    DEFAULT_T3470_INTERVAL_SECS
}

fn default_identification_max_retransmissions() -> u32 {
    DEFAULT_IDENTIFICATION_MAX_RETRANSMISSIONS
}

fn default_specific_retry_interval_secs() -> u64 {
    DEFAULT_SPECIFIC_RETRY_INTERVAL_SECS
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

/// NAS (EMM) timer and retransmission settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NasConfig {
    /// T3470 interval in seconds
    #[serde(default = "default_t3470_interval_secs")]
    pub t3470_interval_secs: u64,
    /// Number of T3470 expiries that abort the identification procedure
    #[serde(default = "default_identification_max_retransmissions")]
    pub identification_max_retransmissions: u32,
    /// Interval of the attach/TAU retry timer re-armed on identity collision
    #[serde(default = "default_specific_retry_interval_secs")]
    pub specific_retry_interval_secs: u64,
}

impl Default for NasConfig {
    fn default() -> Self {
        Self {
            t3470_interval_secs: DEFAULT_T3470_INTERVAL_SECS,
            identification_max_retransmissions: DEFAULT_IDENTIFICATION_MAX_RETRANSMISSIONS,
            specific_retry_interval_secs: DEFAULT_SPECIFIC_RETRY_INTERVAL_SECS,
        }
    }
}

impl NasConfig {
    /// T3470 interval as a [`Duration`].
    pub fn t3470_interval(&self) -> Duration {
        Duration::from_secs(self.t3470_interval_secs)
    }

    /// Specific procedure retry interval as a [`Duration`].
    pub fn specific_retry_interval(&self) -> Duration {
        Duration::from_secs(self.specific_retry_interval_secs)
    }

    /// Checks that every timer and bound is usable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.t3470_interval_secs == 0 {
            return Err(Error::Config("t3470_interval_secs must be non-zero".into()));
        }
        if self.identification_max_retransmissions == 0 {
            return Err(Error::Config(
                "identification_max_retransmissions must be non-zero".into(),
            ));
        }
        if self.specific_retry_interval_secs == 0 {
            return Err(Error::Config(
                "specific_retry_interval_secs must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// MME configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MmeConfig {
    /// Capacity of the EMM task and notification channels
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Optional tracing filter directive, e.g. `info,nextgsim_mme=debug`
    #[serde(default)]
    pub log_filter: Option<String>,
    /// NAS settings
    #[serde(default)]
    pub nas: NasConfig,
}

impl Default for MmeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            log_filter: None,
            nas: NasConfig::default(),
        }
    }
}

impl MmeConfig {
    /// Parses an MME configuration from a YAML string.
    ///
    /// Missing fields take their defaults; the result is validated.
    ///
    /// # Example
    /// ```
    /// use nextgsim_common::config::MmeConfig;
    ///
    /// let yaml = r#"
    /// nas:
    ///   t3470_interval_secs: 3
    /// "#;
    /// let config = MmeConfig::from_yaml(yaml).unwrap();
    /// assert_eq!(config.nas.t3470_interval_secs, 3);
    /// assert_eq!(config.nas.identification_max_retransmissions, 5);
    /// ```
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads an MME configuration from a YAML file.
    ///
    /// # Returns
    /// * `Ok(MmeConfig)` - Successfully loaded configuration
    /// * `Err(Error)` - File I/O, YAML parsing or validation error
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Serializes the configuration to a YAML string.
    pub fn to_yaml(&self) -> Result<String, Error> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), Error> {
        if self.channel_capacity == 0 {
            return Err(Error::Config("channel_capacity must be non-zero".into()));
        }
        self.nas.validate()
    }
}
