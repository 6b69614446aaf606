//! MacChat Core
//!
//! Session protocol for a two-role BLE chat. A responder advertises one fixed
//! service with a notify channel and a write channel; an initiator scans for
//! it in periodic windows, holds at most one session at a time and exchanges
//! UTF-8 text over those two channels.
//!
//! The engines are synchronous state machines fed by a hardware event queue.
//! [`service`] wraps them in tokio tasks with cloneable handles, and [`sim`]
//! provides an in-process radio so both roles can run without hardware.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod errors;
pub mod events;
pub mod initiator;
pub mod message_store;
pub mod protocol;
pub mod radio;
pub mod registry;
pub mod responder;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod sim;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{EngineConfig, MacchatConfig, ResponderConfig, ScanConfig, SessionConfig};
pub use errors::{
    ConfigError, MacchatError, RadioError, ResponderError, Result, SessionError,
};
pub use events::{EventPublisher, InitiatorEvent, ResponderEvent};
pub use initiator::InitiatorEngine;
pub use message_store::MessageStore;
pub use protocol::{
    AttributeRef, ChannelRefs, ServiceDefinition, INBOUND_CHANNEL_UUID, LOCAL_NAME,
    OUTBOUND_CHANNEL_UUID, SERVICE_UUID,
};
pub use radio::{
    Advertisement, CentralEvent, CentralEventReceiver, CentralEventSender, CentralRadio,
    PeripheralEvent, PeripheralEventReceiver, PeripheralEventSender, PeripheralRadio, RadioState,
    UpdateOutcome, WriteRequest, WriteStatus,
};
pub use registry::DeviceRegistry;
pub use responder::{Readiness, ResponderEngine};
pub use scheduler::ScanScheduler;
pub use service::{
    InitiatorHandle, InitiatorService, ResponderHandle, ResponderService, ResponderStatus,
};
pub use session::{Session, SessionManager};
pub use types::{
    Direction, DisconnectReason, MessageRecord, PeerDescriptor, PeerHandle, PeerId, RequestId,
    SessionState, SubscriberRef,
};
