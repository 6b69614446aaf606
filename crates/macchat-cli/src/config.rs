//! MacChat CLI configuration
//!
//! A single TOML file carries the engine settings, the adapter settings and
//! the log level. Missing sections fall back to their defaults.

use std::path::Path;

use macchat_ble::BleConfig;
use macchat_core::{ConfigError, MacchatConfig};
use serde::{Deserialize, Serialize};

use crate::error::Result;

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the `macchat` binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Engine configuration shared by both roles
    pub core: MacchatConfig,
    /// Host adapter configuration
    pub ble: BleConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            core: MacchatConfig::default(),
            ble: BleConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load and validate a configuration file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "log_level",
                reason: "must not be empty".to_string(),
            });
        }
        self.core.validate()?;
        self.ble.validate()
    }

    /// Render the defaults as a commented starting point
    pub fn example_config() -> Result<String> {
        let body = toml::to_string_pretty(&AppConfig::default())?;
        Ok(format!(
            "# MacChat configuration\n# Durations are in seconds; RUST_LOG overrides log_level.\n\n{}",
            body
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::CliError;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_example_config_round_trips() {
        let example = AppConfig::example_config().unwrap();
        assert!(example.starts_with("# MacChat configuration"));
        assert_eq!(AppConfig::from_toml(&example).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            log_level = "debug"

            [core.scan]
            interval = 20.0

            [ble]
            adapter_index = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.core.scan.interval, Duration::from_secs(20));
        assert_eq!(config.core.scan.window, Duration::from_secs(3));
        assert_eq!(config.ble.adapter_index, 1);
        assert_eq!(config.ble.notify_queue_depth, 16);
    }

    #[test]
    fn test_invalid_scan_window_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [core.scan]
            interval = 2.0
            window = 3.0
            "#,
        );
        assert!(matches!(result, Err(CliError::Config(ConfigError::Invalid { .. }))));
    }

    #[test]
    fn test_malformed_file_reports_parse_error() {
        let result = AppConfig::from_toml("log_level = [");
        assert!(matches!(result, Err(CliError::TomlParsing(_))));
    }
}
