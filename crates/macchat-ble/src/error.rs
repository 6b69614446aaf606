//! Error types for the BLE adapters

use macchat_core::RadioError;
use thiserror::Error;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised while driving the host Bluetooth stack
#[derive(Error, Debug)]
pub enum BleError {
    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("Unknown peer handle {handle}")]
    UnknownPeer { handle: u64 },

    #[error("Attribute not found: {uuid}")]
    AttributeNotFound { uuid: Uuid },

    #[error("Unknown write request {id}")]
    UnknownRequest { id: u64 },

    #[error("Operation not supported on this platform: {0}")]
    Unsupported(String),

    #[error("btleplug error: {0}")]
    Btleplug(#[from] btleplug::Error),

    #[cfg(target_os = "linux")]
    #[error("BlueZ error: {0}")]
    Bluez(#[from] bluer::Error),
}

impl From<BleError> for RadioError {
    fn from(err: BleError) -> Self {
        match err {
            BleError::UnknownPeer { handle } => RadioError::UnknownPeer { handle },
            BleError::Unsupported(operation) => RadioError::Unsupported(operation),
            other => RadioError::Backend(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_peer_keeps_handle() {
        let err: RadioError = BleError::UnknownPeer { handle: 7 }.into();
        assert_eq!(err, RadioError::UnknownPeer { handle: 7 });
    }

    #[test]
    fn test_other_errors_become_backend() {
        let err: RadioError = BleError::AdapterNotAvailable.into();
        assert_eq!(err, RadioError::Backend("BLE adapter not available".to_string()));
    }
}
