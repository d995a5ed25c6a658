//! Configuration loading using Figment
//!
//! Configuration is loaded from:
//! 1. `config/lunix.toml` (base configuration, optional)
//! 2. Environment variables prefixed with `LUNIX_`, nested keys separated by
//!    a double underscore (`LUNIX_SENSORS__COUNT=4`)
//!
//! Every field has a default, so an empty or missing file yields a usable
//! configuration.
//!
//! # Example
//! ```no_run
//! use lunix_tng::config::LunixConfig;
//!
//! let config = LunixConfig::load()?;
//! config.validate()?;
//! println!("Sensors: {}", config.sensors.count);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use lunix_chrdev::LUNIX_CHRDEV_MAJOR;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use virtio_crypto::{CONTROL_QUEUE_SIZE, DATA_QUEUE_SIZE};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/lunix.toml";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file or environment could not be parsed.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A value is out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LunixConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Sensor device and simulator settings
    #[serde(default)]
    pub sensors: SensorConfig,
    /// Crypto device settings
    #[serde(default)]
    pub crypto: CryptoConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Lunix sensor device configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Number of sensors; each one takes eight minors
    #[serde(default = "default_sensor_count")]
    pub count: u32,
    /// Major number of the device region
    #[serde(default = "default_major")]
    pub major: u32,
    /// Simulator period in milliseconds
    #[serde(default = "default_update_interval")]
    pub update_interval_ms: u64,
    /// Simulator seed; random when unset
    #[serde(default)]
    pub seed: Option<u64>,
}

/// virtio-crypto configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// Slots in each control queue
    #[serde(default = "default_control_queue_size")]
    pub control_queue_size: usize,
    /// Slots in each data queue
    #[serde(default = "default_data_queue_size")]
    pub data_queue_size: usize,
}

fn default_name() -> String {
    "Lunix:TNG".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sensor_count() -> u32 {
    16
}

fn default_major() -> u32 {
    LUNIX_CHRDEV_MAJOR
}

fn default_update_interval() -> u64 {
    250
}

fn default_control_queue_size() -> usize {
    CONTROL_QUEUE_SIZE
}

fn default_data_queue_size() -> usize {
    DATA_QUEUE_SIZE
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            count: default_sensor_count(),
            major: default_major(),
            update_interval_ms: default_update_interval(),
            seed: None,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            control_queue_size: default_control_queue_size(),
            data_queue_size: default_data_queue_size(),
        }
    }
}

impl SensorConfig {
    /// Simulator period.
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }
}

impl LunixConfig {
    /// Load configuration from `config/lunix.toml` and environment variables
    ///
    /// Example: `LUNIX_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LUNIX_").split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.sensors.count == 0 {
            return Err(ConfigError::Invalid("sensors.count must be at least 1".to_string()));
        }
        if self.sensors.count.checked_mul(lunix_chrdev::MINORS_PER_SENSOR).is_none() {
            return Err(ConfigError::Invalid(format!(
                "sensors.count {} exceeds the minor number space",
                self.sensors.count
            )));
        }
        if self.sensors.update_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sensors.update_interval_ms must be positive".to_string(),
            ));
        }

        if self.crypto.control_queue_size == 0 || self.crypto.data_queue_size == 0 {
            return Err(ConfigError::Invalid("crypto queue sizes must be positive".to_string()));
        }

        Ok(())
    }
}
