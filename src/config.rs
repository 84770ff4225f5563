//! Driver configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. `syrpump.toml` (base configuration)
//! 2. Environment variables (prefixed with `SYRPUMP_`)
//!
//! # Example
//! ```no_run
//! use syrpump::config::DriverConfig;
//!
//! let config = DriverConfig::load()?;
//! println!("Bus adapter: {}", config.serial.port);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use pump_core::limits::{ADDRESS, MIN_READ_TIMEOUT};
use pump_core::serial::{SerialSettings, DEFAULT_BAUD_RATE};
use pump_driver::CalibrationSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "syrpump.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SYRPUMP_";

/// Top-level driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub serial: SerialConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial bus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port path of the bus adapter (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate; the line is always 8N1 without flow control
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Read timeout used until calibration, in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

/// Timeout calibration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Address of a pump known to be present
    #[serde(default)]
    pub reference_address: u8,
    #[serde(default = "default_samples")]
    pub samples: u32,
    #[serde(default = "default_safety_factor")]
    pub safety_factor: f64,
    /// Floor for the calibrated timeout, in milliseconds
    #[serde(default = "default_min_timeout")]
    pub min_timeout_ms: u64,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_read_timeout() -> u64 {
    1000
}

fn default_samples() -> u32 {
    pump_core::limits::CALIBRATION_SAMPLES
}

fn default_safety_factor() -> f64 {
    pump_core::limits::CALIBRATION_SAFETY_FACTOR
}

fn default_min_timeout() -> u64 {
    MIN_READ_TIMEOUT.as_millis() as u64
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reference_address: 0,
            samples: default_samples(),
            safety_factor: default_safety_factor(),
            min_timeout_ms: default_min_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl DriverConfig {
    /// Load configuration from `syrpump.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `SYRPUMP_`, nested
    /// keys separated by a double underscore.
    /// Example: `SYRPUMP_SERIAL__PORT=/dev/ttyUSB1`
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(CONFIG_FILE)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// The provider stack behind [`DriverConfig::load_from`].
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Serialized::default("timing", TimingConfig::default()))
            .merge(Serialized::default("logging", LoggingConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.serial.port.trim().is_empty() {
            return Err("serial.port must not be empty".to_string());
        }
        if self.serial.baud_rate == 0 {
            return Err("serial.baud_rate must be positive".to_string());
        }
        if self.serial.read_timeout_ms == 0 {
            return Err("serial.read_timeout_ms must be positive".to_string());
        }

        if !ADDRESS.contains(self.timing.reference_address.into()) {
            return Err(format!(
                "Invalid timing.reference_address {}. Must be {}-{}",
                self.timing.reference_address, ADDRESS.min, ADDRESS.max
            ));
        }
        if self.timing.samples == 0 {
            return Err("timing.samples must be at least 1".to_string());
        }
        if self.timing.safety_factor.is_nan() || self.timing.safety_factor <= 0.0 {
            return Err(format!(
                "Invalid timing.safety_factor {}. Must be positive",
                self.timing.safety_factor
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }
        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(format!(
                "Invalid logging.format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            ));
        }

        Ok(())
    }

    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings::new(self.serial.port.clone()).with_baud_rate(self.serial.baud_rate)
    }

    pub fn initial_read_timeout(&self) -> Duration {
        Duration::from_millis(self.serial.read_timeout_ms)
    }

    pub fn calibration_settings(&self) -> CalibrationSettings {
        CalibrationSettings {
            reference: self.timing.reference_address,
            samples: self.timing.samples,
            safety_factor: self.timing.safety_factor,
            min_timeout: Duration::from_millis(self.timing.min_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_load_applies_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE, "[serial]\nport = \"/dev/ttyUSB0\"\n")?;
            let config = DriverConfig::load()?;
            assert_eq!(config.serial.baud_rate, 19200);
            assert_eq!(config.serial.read_timeout_ms, 1000);
            assert_eq!(config.timing, TimingConfig::default());
            assert_eq!(config.logging.level, "info");
            assert!(config.validate().is_ok());
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                "[serial]\nport = \"/dev/ttyUSB0\"\n\n[timing]\nreference_address = 3\n",
            )?;
            jail.set_env("SYRPUMP_SERIAL__PORT", "/dev/ttyUSB1");
            jail.set_env("SYRPUMP_TIMING__SAMPLES", "4");
            let config = DriverConfig::load()?;
            assert_eq!(config.serial.port, "/dev/ttyUSB1");
            assert_eq!(config.timing.reference_address, 3);
            assert_eq!(config.timing.samples, 4);
            assert_eq!(config.calibration_settings().reference, 3);
            Ok(())
        });
    }

    #[test]
    fn test_missing_port_fails() {
        Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE, "[timing]\nsamples = 2\n")?;
            assert!(DriverConfig::load().is_err());
            Ok(())
        });
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = DriverConfig {
            serial: SerialConfig {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: default_baud_rate(),
                read_timeout_ms: default_read_timeout(),
            },
            timing: TimingConfig::default(),
            logging: LoggingConfig::default(),
        };
        assert!(config.validate().is_ok());

        config.timing.reference_address = 100;
        assert!(config.validate().unwrap_err().contains("reference_address"));

        config.timing.reference_address = 0;
        config.logging.format = "xml".to_string();
        assert!(config.validate().unwrap_err().contains("logging.format"));
    }
}
