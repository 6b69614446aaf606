//! BLE adapter configuration

use macchat_core::ConfigError;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Settings shared by the central and peripheral adapters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// Index into the host's adapter list
    pub adapter_index: usize,
    /// Pending notifications held per subscriber before `BufferFull`
    pub notify_queue_depth: usize,
    /// Use acknowledged writes on the inbound channel
    pub write_with_response: bool,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            notify_queue_depth: 16,
            write_with_response: true,
        }
    }
}

impl BleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the host adapter by position
    pub fn with_adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    /// Set the per-subscriber notification queue depth
    pub fn with_notify_queue_depth(mut self, depth: usize) -> Self {
        self.notify_queue_depth = depth;
        self
    }

    pub fn with_write_with_response(mut self, enabled: bool) -> Self {
        self.write_with_response = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.notify_queue_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "ble.notify_queue_depth",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BleConfig::default();
        assert_eq!(config.adapter_index, 0);
        assert_eq!(config.notify_queue_depth, 16);
        assert!(config.write_with_response);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_queue_depth_rejected() {
        let config = BleConfig::new().with_notify_queue_depth(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "ble.notify_queue_depth",
                ..
            })
        ));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: BleConfig = toml::from_str("adapter_index = 1").unwrap();
        assert_eq!(config, BleConfig::new().with_adapter_index(1));
    }
}
