//! MacChat GATT protocol constants and payload codec
//!
//! Both roles share one service with two attributes. The outbound channel is
//! notify-capable and carries responder → initiator traffic; the inbound
//! channel is write-capable and carries initiator → responder traffic. The
//! wire payload is the raw UTF-8 text of a single message: no length prefix,
//! no framing, one message per write or notification.

use std::str::Utf8Error;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::SessionError;

// ----------------------------------------------------------------------------
// Service and Attribute UUIDs
// ----------------------------------------------------------------------------

/// MacChat service UUID
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x7E57C000_2C8F_4F3C_9F91_8577E1891234);

/// Outbound (notify) attribute, responder → initiator
pub const OUTBOUND_CHANNEL_UUID: Uuid = Uuid::from_u128(0x7E57C001_2C8F_4F3C_9F91_8577E1891234);

/// Inbound (write) attribute, initiator → responder
pub const INBOUND_CHANNEL_UUID: Uuid = Uuid::from_u128(0x7E57C002_2C8F_4F3C_9F91_8577E1891234);

/// Local name carried in the responder's advertisement
pub const LOCAL_NAME: &str = "MacChat";

/// Display name used for peers that advertise without a local name
pub const UNKNOWN_PEER_NAME: &str = "Unknown";

// ----------------------------------------------------------------------------
// Attribute Model
// ----------------------------------------------------------------------------

/// Capabilities of a single GATT attribute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl AttributeProperties {
    /// Notify-only attribute
    pub const fn notify() -> Self {
        Self {
            read: false,
            write: false,
            write_without_response: false,
            notify: true,
            indicate: false,
        }
    }

    /// Write-only attribute (with and without response)
    pub const fn write() -> Self {
        Self {
            read: false,
            write: true,
            write_without_response: true,
            notify: false,
            indicate: false,
        }
    }

    pub fn can_notify(&self) -> bool {
        self.notify || self.indicate
    }

    pub fn can_write(&self) -> bool {
        self.write || self.write_without_response
    }
}

/// One attribute inside a service, either registered locally or discovered remotely
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub uuid: Uuid,
    pub properties: AttributeProperties,
}

/// A GATT service with its attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub uuid: Uuid,
    pub attributes: Vec<AttributeDefinition>,
}

impl ServiceDefinition {
    /// Look up an attribute by UUID
    pub fn attribute(&self, uuid: Uuid) -> Option<&AttributeDefinition> {
        self.attributes.iter().find(|a| a.uuid == uuid)
    }
}

/// Reference to a discovered remote attribute, used to target writes and subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeRef {
    pub service: Uuid,
    pub attribute: Uuid,
}

impl AttributeRef {
    pub const fn new(service: Uuid, attribute: Uuid) -> Self {
        Self { service, attribute }
    }
}

/// Both channel references of a compatible responder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRefs {
    pub outbound: AttributeRef,
    pub inbound: AttributeRef,
}

/// The fixed attribute set a responder registers
pub fn service_definition() -> ServiceDefinition {
    ServiceDefinition {
        uuid: SERVICE_UUID,
        attributes: vec![
            AttributeDefinition {
                uuid: OUTBOUND_CHANNEL_UUID,
                properties: AttributeProperties::notify(),
            },
            AttributeDefinition {
                uuid: INBOUND_CHANNEL_UUID,
                properties: AttributeProperties::write(),
            },
        ],
    }
}

/// Extract the protocol channels from a discovery result.
///
/// The service must be present, the outbound attribute must be notify-capable
/// and the inbound attribute must be write-capable. Anything else is a
/// protocol mismatch.
pub fn match_channels(services: &[ServiceDefinition]) -> Result<ChannelRefs, SessionError> {
    let service = services
        .iter()
        .find(|s| s.uuid == SERVICE_UUID)
        .ok_or_else(|| SessionError::ProtocolMismatch {
            missing: format!("service {}", SERVICE_UUID),
        })?;

    let outbound = service
        .attribute(OUTBOUND_CHANNEL_UUID)
        .filter(|a| a.properties.can_notify())
        .ok_or_else(|| SessionError::ProtocolMismatch {
            missing: format!("notify attribute {}", OUTBOUND_CHANNEL_UUID),
        })?;

    let inbound = service
        .attribute(INBOUND_CHANNEL_UUID)
        .filter(|a| a.properties.can_write())
        .ok_or_else(|| SessionError::ProtocolMismatch {
            missing: format!("write attribute {}", INBOUND_CHANNEL_UUID),
        })?;

    Ok(ChannelRefs {
        outbound: AttributeRef::new(service.uuid, outbound.uuid),
        inbound: AttributeRef::new(service.uuid, inbound.uuid),
    })
}

// ----------------------------------------------------------------------------
// Payload Codec
// ----------------------------------------------------------------------------

/// Encode a message for a single attribute write or notification
pub fn encode_text(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

/// Decode a received payload
pub fn decode_text(payload: &[u8]) -> Result<String, Utf8Error> {
    std::str::from_utf8(payload).map(str::to_owned)
}
