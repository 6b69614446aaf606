//! Error types for the MacChat engines
//!
//! Every failure here is recoverable. Engines log it, fall back to an idle or
//! no-op state and keep running; nothing in the core is fatal to the process.

use thiserror::Error;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Failures reported by a radio capability when issuing a request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("Radio is not powered on")]
    NotReady,
    #[error("Unknown peer handle {handle}")]
    UnknownPeer { handle: u64 },
    #[error("Operation not supported on this platform: {0}")]
    Unsupported(String),
    #[error("Radio backend error: {0}")]
    Backend(String),
}

/// Initiator session failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Responder is incompatible: missing {missing}")]
    ProtocolMismatch { missing: String },
    #[error("Connection failed to peer {peer_id}: {reason}")]
    ConnectionFailed { peer_id: String, reason: String },
    #[error("No active session with peer {peer_id}")]
    NotActive { peer_id: String },
    #[error("A session with peer {peer_id} is already in progress")]
    Busy { peer_id: String },
    #[error("Peer {peer_id} is not among the discovered devices")]
    UnknownPeer { peer_id: String },
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },
    #[error(transparent)]
    Radio(#[from] RadioError),
}

/// Responder engine failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponderError {
    #[error("Responder radio is not ready")]
    NotReady,
    #[error("Service registration failed: {0}")]
    RegistrationFailed(String),
    #[error("Outbound buffer is full")]
    BufferFull,
    #[error("No initiator is subscribed")]
    NoSubscribers,
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },
    #[error(transparent)]
    Radio(#[from] RadioError),
}

/// Configuration failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("Configuration I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration parse error: {0}")]
    Parse(String),
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Umbrella error for the MacChat core
#[derive(Debug, Error)]
pub enum MacchatError {
    #[error("Radio error: {0}")]
    Radio(#[from] RadioError),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Responder error: {0}")]
    Responder(#[from] ResponderError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Engine task has stopped")]
    EngineStopped,
}

/// Result type for MacChat operations
pub type Result<T> = std::result::Result<T, MacchatError>;
