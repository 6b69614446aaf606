//! Radio capability consumed by the engines
//!
//! Both traits are request issuers. A method returns as soon as the request
//! is handed to the hardware; its completion arrives later as an event on the
//! engine's delivery queue. An `Err` means the request was never issued.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::errors::RadioError;
use crate::protocol::{AttributeRef, ServiceDefinition};
use crate::types::{PeerHandle, PeerId, RequestId, SubscriberRef};

// ----------------------------------------------------------------------------
// Radio State
// ----------------------------------------------------------------------------

/// Power/authorization state of the local radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RadioState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl RadioState {
    /// Only a powered-on radio accepts requests
    pub fn is_ready(self) -> bool {
        self == RadioState::PoweredOn
    }
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RadioState::Unknown => "unknown",
            RadioState::Resetting => "resetting",
            RadioState::Unsupported => "unsupported",
            RadioState::Unauthorized => "unauthorized",
            RadioState::PoweredOff => "powered off",
            RadioState::PoweredOn => "powered on",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Central (Initiator) Capability
// ----------------------------------------------------------------------------

/// Radio operations available to the initiator role
pub trait CentralRadio: Send {
    fn state(&self) -> RadioState;

    /// Begin discovery, optionally limited to advertisers of `service`
    fn start_scan(&mut self, service: Option<Uuid>) -> Result<(), RadioError>;

    fn stop_scan(&mut self) -> Result<(), RadioError>;

    fn connect(&mut self, peer: PeerHandle) -> Result<(), RadioError>;

    /// Cancel a pending connection or drop an established one
    fn cancel_connection(&mut self, peer: PeerHandle) -> Result<(), RadioError>;

    /// Discover attributes of `service` on a connected peer
    fn discover_attributes(&mut self, peer: PeerHandle, service: Uuid) -> Result<(), RadioError>;

    /// Enable notifications on a discovered attribute
    fn subscribe(&mut self, peer: PeerHandle, attribute: AttributeRef) -> Result<(), RadioError>;

    fn write(
        &mut self,
        peer: PeerHandle,
        attribute: AttributeRef,
        value: &[u8],
    ) -> Result<(), RadioError>;
}

/// Hardware callbacks delivered to the initiator
#[derive(Debug, Clone, PartialEq)]
pub enum CentralEvent {
    StateChanged(RadioState),
    Discovered {
        peer_id: PeerId,
        name: Option<String>,
        rssi: i16,
        handle: PeerHandle,
    },
    Connected {
        peer_id: PeerId,
    },
    ConnectFailed {
        peer_id: PeerId,
        reason: String,
    },
    Disconnected {
        peer_id: PeerId,
        error: Option<String>,
    },
    AttributesDiscovered {
        peer_id: PeerId,
        result: Result<Vec<ServiceDefinition>, String>,
    },
    /// Notification state of `attribute` changed; `Ok(true)` means enabled
    SubscriptionChanged {
        peer_id: PeerId,
        attribute: AttributeRef,
        result: Result<bool, String>,
    },
    Notification {
        peer_id: PeerId,
        attribute: AttributeRef,
        value: Vec<u8>,
    },
    WriteCompleted {
        peer_id: PeerId,
        attribute: AttributeRef,
        error: Option<String>,
    },
}

pub type CentralEventSender = mpsc::UnboundedSender<CentralEvent>;
pub type CentralEventReceiver = mpsc::UnboundedReceiver<CentralEvent>;

// ----------------------------------------------------------------------------
// Peripheral (Responder) Capability
// ----------------------------------------------------------------------------

/// Advertisement payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub service: Uuid,
    pub local_name: String,
}

/// Result of pushing a notification into the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Sent,
    /// Transport queue is full; nothing was sent
    BufferFull,
}

/// Acknowledgement sent back for a write request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Success,
    RequestNotSupported,
}

/// A write addressed to a local attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub id: RequestId,
    pub from: PeerId,
    pub attribute: Uuid,
    pub value: Vec<u8>,
}

/// Radio operations available to the responder role
pub trait PeripheralRadio: Send {
    fn state(&self) -> RadioState;

    /// Publish the local GATT service; completion arrives as `ServiceRegistered`
    fn register_service(&mut self, service: &ServiceDefinition) -> Result<(), RadioError>;

    fn start_advertising(&mut self, advertisement: &Advertisement) -> Result<(), RadioError>;

    fn stop_advertising(&mut self) -> Result<(), RadioError>;

    /// Push one value update to all `subscribers` at once
    fn update_value(
        &mut self,
        attribute: Uuid,
        value: &[u8],
        subscribers: &[SubscriberRef],
    ) -> UpdateOutcome;

    fn respond(&mut self, request: RequestId, status: WriteStatus) -> Result<(), RadioError>;
}

/// Hardware callbacks delivered to the responder
#[derive(Debug, Clone, PartialEq)]
pub enum PeripheralEvent {
    StateChanged(RadioState),
    ServiceRegistered {
        error: Option<String>,
    },
    AdvertisingStarted {
        error: Option<String>,
    },
    Subscribed {
        subscriber: SubscriberRef,
        attribute: Uuid,
    },
    Unsubscribed {
        subscriber: SubscriberRef,
        attribute: Uuid,
    },
    WriteRequests(Vec<WriteRequest>),
    ReadyToUpdate,
}

pub type PeripheralEventSender = mpsc::UnboundedSender<PeripheralEvent>;
pub type PeripheralEventReceiver = mpsc::UnboundedReceiver<PeripheralEvent>;
