//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::protocol::LOCAL_NAME;

// ----------------------------------------------------------------------------
// Scan Configuration
// ----------------------------------------------------------------------------

/// Periodic discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Time between the starts of two consecutive scan windows
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// How long discovery runs in each cycle before pruning and publishing
    #[serde(with = "duration_secs")]
    pub window: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            window: Duration::from_secs(3),
        }
    }
}

impl ScanConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// A window must close before the next cycle opens a new one
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.is_zero() {
            return Err(ConfigError::Invalid {
                field: "scan.window",
                reason: "must be greater than zero".to_string(),
            });
        }
        validate_interval(self.interval, self.window)
    }
}

pub(crate) fn validate_interval(interval: Duration, window: Duration) -> Result<(), ConfigError> {
    if interval.is_zero() {
        return Err(ConfigError::Invalid {
            field: "scan.interval",
            reason: "must be greater than zero".to_string(),
        });
    }
    if interval < window {
        return Err(ConfigError::Invalid {
            field: "scan.interval",
            reason: format!(
                "{:?} is shorter than the {:?} scan window",
                interval, window
            ),
        });
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Session / Responder Configuration
// ----------------------------------------------------------------------------

/// Initiator session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Largest payload accepted for a single attribute write
    pub max_payload_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_payload_len: 512,
        }
    }
}

/// Responder settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    /// Local name placed in the advertisement
    pub local_name: String,
    /// Largest payload accepted for a single notification
    pub max_payload_len: usize,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            local_name: LOCAL_NAME.to_string(),
            max_payload_len: 512,
        }
    }
}

/// Channel sizing for the engine services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of the consumer event broadcast channel
    pub event_buffer: usize,
    /// Capacity of the command queue feeding an engine task
    pub command_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_buffer: 64,
            command_buffer: 32,
        }
    }
}

// ----------------------------------------------------------------------------
// Aggregate Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for both roles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacchatConfig {
    pub scan: ScanConfig,
    pub session: SessionConfig,
    pub responder: ResponderConfig,
    pub engine: EngineConfig,
}

impl MacchatConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scan(mut self, scan: ScanConfig) -> Self {
        self.scan = scan;
        self
    }

    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.responder.local_name = name.into();
        self
    }

    pub fn with_max_payload_len(mut self, len: usize) -> Self {
        self.session.max_payload_len = len;
        self.responder.max_payload_len = len;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scan.validate()?;
        if self.session.max_payload_len == 0 || self.responder.max_payload_len == 0 {
            return Err(ConfigError::Invalid {
                field: "max_payload_len",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.responder.local_name.is_empty() {
            return Err(ConfigError::Invalid {
                field: "responder.local_name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.engine.event_buffer == 0 || self.engine.command_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "engine",
                reason: "channel capacities must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Serialize durations as fractional seconds
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MacchatConfig::default();
        assert_eq!(config.scan.interval, Duration::from_secs(10));
        assert_eq!(config.scan.window, Duration::from_secs(3));
        assert_eq!(config.responder.local_name, "MacChat");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_window_longer_than_interval_rejected() {
        let scan = ScanConfig::new()
            .with_interval(Duration::from_secs(2))
            .with_window(Duration::from_secs(3));
        assert!(matches!(
            scan.validate(),
            Err(ConfigError::Invalid { field: "scan.interval", .. })
        ));
    }

    #[test]
    fn test_zero_values_rejected() {
        let scan = ScanConfig::new().with_window(Duration::ZERO);
        assert!(scan.validate().is_err());

        let config = MacchatConfig::new().with_max_payload_len(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_uses_seconds() {
        let text = "[scan]\ninterval = 5.0\nwindow = 1.5\n";
        let config: MacchatConfig = toml::from_str(text).unwrap();
        assert_eq!(config.scan.interval, Duration::from_secs(5));
        assert_eq!(config.scan.window, Duration::from_millis(1500));
        // Unspecified sections fall back to defaults
        assert_eq!(config.responder.local_name, "MacChat");
    }
}
