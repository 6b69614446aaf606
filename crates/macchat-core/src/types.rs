//! Shared data model: peer identity, descriptors, message records, subscribers

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// ----------------------------------------------------------------------------
// Peer Identity
// ----------------------------------------------------------------------------

/// Stable hardware identifier of a remote device.
///
/// Identity is never derived from the advertised name: names are not unique
/// and may be missing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Opaque connection handle minted by the radio adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerHandle(u64);

impl PeerHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Peer Descriptor
// ----------------------------------------------------------------------------

/// A responder seen during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDescriptor {
    /// Stable hardware identifier
    pub id: PeerId,
    /// Advertised local name, or "Unknown"
    pub name: String,
    /// Received signal strength (dBm)
    pub signal_strength: i16,
    /// When this peer was last reported by discovery
    pub last_seen: Instant,
    /// Handle used to target connect/disconnect requests
    pub handle: PeerHandle,
}

// ----------------------------------------------------------------------------
// Messages
// ----------------------------------------------------------------------------

/// Direction of a message relative to the local device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One entry of a per-peer history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub peer_id: PeerId,
    pub direction: Direction,
    pub text: String,
}

impl MessageRecord {
    pub fn inbound(peer_id: PeerId, text: impl Into<String>) -> Self {
        Self {
            peer_id,
            direction: Direction::Inbound,
            text: text.into(),
        }
    }

    pub fn outbound(peer_id: PeerId, text: impl Into<String>) -> Self {
        Self {
            peer_id,
            direction: Direction::Outbound,
            text: text.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Responder Side
// ----------------------------------------------------------------------------

/// A remote initiator subscribed to the outbound channel.
///
/// Equality is peer identity, so an unsubscribe event built from a fresh
/// reference still matches the stored one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberRef {
    peer_id: PeerId,
}

impl SubscriberRef {
    pub fn new(peer_id: PeerId) -> Self {
        Self { peer_id }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }
}

/// Opaque identifier of a pending write request, used to acknowledge it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

// ----------------------------------------------------------------------------
// Session Lifecycle
// ----------------------------------------------------------------------------

/// Initiator session phase.
///
/// A torn-down session is not kept around: the manager drops it and reports
/// `Idle`, ready for the next connect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Connecting,
    AttributeDiscovery,
    Subscribing,
    Active,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::AttributeDiscovery => "attribute-discovery",
            SessionState::Subscribing => "subscribing",
            SessionState::Active => "active",
        };
        f.write_str(name)
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Requested locally (explicit disconnect or switching peers)
    Local,
    /// Signalled by the hardware, optionally with a transport error
    Remote(Option<String>),
    /// The local radio stopped being powered on
    RadioOff,
}

impl DisconnectReason {
    pub fn is_local(&self) -> bool {
        matches!(self, DisconnectReason::Local)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Local => write!(f, "disconnected locally"),
            DisconnectReason::Remote(None) => write!(f, "disconnected by peer"),
            DisconnectReason::Remote(Some(err)) => write!(f, "link lost: {}", err),
            DisconnectReason::RadioOff => write!(f, "radio powered off"),
        }
    }
}
