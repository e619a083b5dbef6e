//! Configuration using Figment
//!
//! Settings are layered, lowest precedence first:
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `CN8PT_` (nested keys joined by `__`)
//!
//! # Environment Variable Overrides
//!
//! ```text
//! CN8PT_DEVICE__ADDRESS=192.168.1.40
//! CN8PT_DEVICE__PORT=2001
//! CN8PT_SCAN__TEMPERATURE_PERIOD_MS=500
//! CN8PT_APPLICATION__LOG_LEVEL=debug
//! ```
//!
//! # Example file
//!
//! ```toml
//! [device]
//! address = "10.66.50.95"
//! port = 2000
//! io_timeout_ms = 1500
//!
//! [scan]
//! temperature_period_ms = 2000
//! ```

use crate::error::{BridgeError, BridgeResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "CN8PT_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Controller connection.
    #[serde(default)]
    pub device: DeviceSettings,
    /// Periodic refresh.
    #[serde(default)]
    pub scan: ScanSettings,
    /// Startup hook retry policy.
    #[serde(default)]
    pub startup: StartupSettings,
    /// Process-level settings.
    #[serde(default)]
    pub application: ApplicationSettings,
}

/// Controller network endpoint and exchange limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Host name or IP address
    #[serde(default = "default_address")]
    pub address: String,
    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connection timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Write and read timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub io_timeout_ms: u64,
    /// Upper bound on bytes read per response
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

/// Periodic refresh settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Temperature poll period in milliseconds
    #[serde(default = "default_temperature_period_ms")]
    pub temperature_period_ms: u64,
}

/// Retry policy for startup hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupSettings {
    /// Attempts per hook (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

/// Process-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Prefix prepended to control point names when they are published
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty or json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            connect_timeout_ms: default_timeout_ms(),
            io_timeout_ms: default_timeout_ms(),
            max_response_bytes: default_max_response_bytes(),
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            temperature_period_ms: default_temperature_period_ms(),
        }
    }
}

impl Default for StartupSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_address() -> String {
    "10.66.50.95".to_string()
}

fn default_port() -> u16 {
    2000
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_max_response_bytes() -> usize {
    100
}

fn default_temperature_period_ms() -> u64 {
    2000
}

fn default_max_attempts() -> u32 {
    1
}

fn default_backoff_ms() -> u64 {
    250
}

fn default_prefix() -> String {
    "cn8pt:".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

// ============================================================================
// Loading and validation
// ============================================================================

impl Settings {
    /// Load defaults, then the optional TOML file, then `CN8PT_` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or validation fails. A path that
    /// does not exist is treated as an empty file.
    pub fn load(path: Option<&Path>) -> BridgeResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let settings: Settings = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check values that parse but make no sense.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.device.address.trim().is_empty() {
            return Err(invalid("device.address must not be empty"));
        }
        if self.device.port == 0 {
            return Err(invalid("device.port must be non-zero"));
        }
        if self.device.connect_timeout_ms == 0 || self.device.io_timeout_ms == 0 {
            return Err(invalid("device timeouts must be non-zero"));
        }
        if self.device.max_response_bytes < 8 {
            return Err(invalid(format!(
                "device.max_response_bytes {} is too small (minimum 8)",
                self.device.max_response_bytes
            )));
        }
        if self.scan.temperature_period_ms == 0 {
            return Err(invalid("scan.temperature_period_ms must be non-zero"));
        }
        if self.startup.max_attempts == 0 {
            return Err(invalid("startup.max_attempts must be at least 1"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }
        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(invalid(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }
        Ok(())
    }

    /// Temperature poll period.
    pub fn temperature_period(&self) -> Duration {
        Duration::from_millis(self.scan.temperature_period_ms)
    }
}

fn invalid(msg: impl Into<String>) -> BridgeError {
    BridgeError::Configuration(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.device.address, "10.66.50.95");
        assert_eq!(settings.device.port, 2000);
        assert_eq!(settings.device.max_response_bytes, 100);
        assert_eq!(settings.temperature_period(), Duration::from_secs(2));
        assert_eq!(settings.startup.max_attempts, 1);
        assert_eq!(settings.application.prefix, "cn8pt:");
    }

    #[test]
    #[serial]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[device]\naddress = \"192.168.0.7\"\nport = 2101\n\n[scan]\ntemperature_period_ms = 500"
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.device.address, "192.168.0.7");
        assert_eq!(settings.device.port, 2101);
        assert_eq!(settings.device.io_timeout_ms, 2000);
        assert_eq!(settings.scan.temperature_period_ms, 500);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[device]\nport = 2101").unwrap();

        std::env::set_var("CN8PT_DEVICE__PORT", "2202");
        let result = Settings::load(Some(file.path()));
        std::env::remove_var("CN8PT_DEVICE__PORT");

        assert_eq!(result.unwrap().device.port, 2202);
    }

    #[test]
    #[serial]
    fn test_validation_rejects_zero_period() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scan]\ntemperature_period_ms = 0").unwrap();

        let err = Settings::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
    }

    #[test]
    fn test_validation_rejects_bad_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "chatty".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[device]\nport = \"not a number\"").unwrap();

        let err = Settings::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }
}
