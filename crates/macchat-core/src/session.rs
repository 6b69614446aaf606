//! Initiator session state machine
//!
//! `Idle → Connecting → AttributeDiscovery → Subscribing → Active`, with a
//! return to `Idle` on any teardown. At most one session exists at a time.
//! All per-connection handles live together in one [`Session`] record, so a
//! teardown can never leave part of a peer's state behind.
//!
//! Every hardware callback is matched against the current session by peer
//! identity; callbacks for a peer that has already been torn down are dropped.

use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::errors::{RadioError, SessionError};
use crate::events::{EventPublisher, InitiatorEvent};
use crate::message_store::MessageStore;
use crate::protocol::{self, AttributeRef, ChannelRefs, ServiceDefinition, SERVICE_UUID};
use crate::radio::{CentralEvent, CentralRadio, RadioState};
use crate::types::{DisconnectReason, MessageRecord, PeerDescriptor, PeerHandle, PeerId, SessionState};

// ----------------------------------------------------------------------------
// Session Record
// ----------------------------------------------------------------------------

/// Bound state for the single connected peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    peer_id: PeerId,
    handle: PeerHandle,
    channels: Option<ChannelRefs>,
    subscribed: bool,
    state: SessionState,
}

impl Session {
    fn new(peer_id: PeerId, handle: PeerHandle) -> Self {
        Self {
            peer_id,
            handle,
            channels: None,
            subscribed: false,
            state: SessionState::Connecting,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn handle(&self) -> PeerHandle {
        self.handle
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn outbound_channel(&self) -> Option<AttributeRef> {
        self.channels.map(|c| c.outbound)
    }

    pub fn inbound_channel(&self) -> Option<AttributeRef> {
        self.channels.map(|c| c.inbound)
    }
}

// ----------------------------------------------------------------------------
// Session Manager
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct SessionManager {
    config: SessionConfig,
    session: Option<Session>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or(SessionState::Idle, Session::state)
    }

    /// Peer of the current session, whatever its phase
    pub fn peer_id(&self) -> Option<&PeerId> {
        self.session.as_ref().map(Session::peer_id)
    }

    /// Peer of the current session once it is `Active`
    pub fn active_peer(&self) -> Option<&PeerId> {
        self.session
            .as_ref()
            .filter(|s| s.state == SessionState::Active)
            .map(Session::peer_id)
    }

    /// Switch to `descriptor`, tearing down any session with another peer first.
    ///
    /// Selecting the peer the current session already targets is a no-op.
    pub fn select_peer<R: CentralRadio + ?Sized>(
        &mut self,
        descriptor: &PeerDescriptor,
        radio: &mut R,
        events: &EventPublisher<InitiatorEvent>,
    ) -> Result<(), SessionError> {
        if let Some(session) = &self.session {
            if session.peer_id == descriptor.id {
                debug!(peer = %descriptor.id, state = %session.state, "Peer already selected");
                return Ok(());
            }
            self.disconnect(radio, events);
        }
        self.connect(descriptor, radio, events)
    }

    /// Begin connecting to `descriptor`; only valid from `Idle`
    pub fn connect<R: CentralRadio + ?Sized>(
        &mut self,
        descriptor: &PeerDescriptor,
        radio: &mut R,
        events: &EventPublisher<InitiatorEvent>,
    ) -> Result<(), SessionError> {
        if let Some(session) = &self.session {
            return Err(SessionError::Busy {
                peer_id: session.peer_id.to_string(),
            });
        }

        match radio.connect(descriptor.handle) {
            Ok(()) => {}
            Err(RadioError::NotReady) => {
                warn!(peer = %descriptor.id, "Radio not ready, connect skipped");
                return Err(RadioError::NotReady.into());
            }
            Err(e) => {
                error!(peer = %descriptor.id, "Connect request failed: {}", e);
                events.publish(InitiatorEvent::ConnectionFailed {
                    peer_id: descriptor.id.clone(),
                    reason: e.to_string(),
                });
                return Err(SessionError::ConnectionFailed {
                    peer_id: descriptor.id.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        info!(peer = %descriptor.id, name = %descriptor.name, "Connecting");
        self.session = Some(Session::new(descriptor.id.clone(), descriptor.handle));
        self.publish_state(events);
        Ok(())
    }

    /// Tear down the current session, whatever its phase.
    ///
    /// State resets immediately; the hardware teardown completes on its own.
    /// Returns false when there was nothing to tear down.
    pub fn disconnect<R: CentralRadio + ?Sized>(
        &mut self,
        radio: &mut R,
        events: &EventPublisher<InitiatorEvent>,
    ) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        if let Err(e) = radio.cancel_connection(session.handle) {
            warn!(peer = %session.peer_id, "Cancel connection failed: {}", e);
        }
        info!(peer = %session.peer_id, "Disconnected locally");
        events.publish(InitiatorEvent::DeviceDisconnected {
            peer_id: session.peer_id,
            reason: DisconnectReason::Local,
        });
        true
    }

    /// Write `text` on the inbound channel of the active session
    pub fn send<R: CentralRadio + ?Sized>(
        &mut self,
        peer_id: &PeerId,
        text: &str,
        radio: &mut R,
        store: &mut MessageStore,
    ) -> Result<(), SessionError> {
        let target = self
            .session
            .as_ref()
            .filter(|s| s.state == SessionState::Active && s.peer_id == *peer_id)
            .and_then(|s| s.inbound_channel().map(|inbound| (s.handle, inbound)));

        let Some((handle, inbound)) = target else {
            warn!(peer = %peer_id, "No active session with peer, message not sent");
            return Err(SessionError::NotActive {
                peer_id: peer_id.to_string(),
            });
        };

        let payload = protocol::encode_text(text);
        if payload.len() > self.config.max_payload_len {
            warn!(peer = %peer_id, size = payload.len(), "Message exceeds single write capacity");
            return Err(SessionError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_len,
            });
        }

        radio.write(handle, inbound, &payload)?;
        store.append(MessageRecord::outbound(peer_id.clone(), text));
        debug!(peer = %peer_id, bytes = payload.len(), "Message written");
        Ok(())
    }

    /// Feed one hardware callback through the state machine
    pub fn handle_event<R: CentralRadio + ?Sized>(
        &mut self,
        event: CentralEvent,
        radio: &mut R,
        store: &mut MessageStore,
        events: &EventPublisher<InitiatorEvent>,
    ) {
        match event {
            CentralEvent::StateChanged(state) => self.on_radio_state(state, events),
            CentralEvent::Discovered { .. } => {}
            CentralEvent::Connected { peer_id } => self.on_connected(&peer_id, radio, events),
            CentralEvent::ConnectFailed { peer_id, reason } => {
                if self.is_current(&peer_id, SessionState::Connecting) {
                    warn!(peer = %peer_id, "Connection failed: {}", reason);
                    self.session = None;
                    events.publish(InitiatorEvent::ConnectionFailed { peer_id, reason });
                } else {
                    debug!(peer = %peer_id, "Ignoring stale connect failure");
                }
            }
            CentralEvent::Disconnected { peer_id, error } => {
                // A new attempt fails through `ConnectFailed`; a disconnect seen
                // while connecting belongs to the link that was cancelled before it
                if self.is_current(&peer_id, SessionState::Connecting) {
                    debug!(peer = %peer_id, "Ignoring disconnect of cancelled link");
                } else if self.peer_id() == Some(&peer_id) {
                    self.session = None;
                    info!(peer = %peer_id, "Peer disconnected");
                    events.publish(InitiatorEvent::DeviceDisconnected {
                        peer_id,
                        reason: DisconnectReason::Remote(error),
                    });
                } else {
                    debug!(peer = %peer_id, "Ignoring disconnect for torn-down peer");
                }
            }
            CentralEvent::AttributesDiscovered { peer_id, result } => {
                self.on_attributes(&peer_id, result, radio, events)
            }
            CentralEvent::SubscriptionChanged {
                peer_id,
                attribute,
                result,
            } => self.on_subscription(&peer_id, attribute, result, radio, events),
            CentralEvent::Notification {
                peer_id,
                attribute,
                value,
            } => self.on_notification(peer_id, attribute, &value, store, events),
            CentralEvent::WriteCompleted { peer_id, error, .. } => {
                if let Some(reason) = error {
                    if self.is_current(&peer_id, SessionState::Active) {
                        warn!(peer = %peer_id, "Write failed: {}", reason);
                        events.publish(InitiatorEvent::SendFailed { peer_id, reason });
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    fn on_radio_state(&mut self, state: RadioState, events: &EventPublisher<InitiatorEvent>) {
        if state.is_ready() {
            return;
        }
        if let Some(session) = self.session.take() {
            warn!(peer = %session.peer_id, "Radio {}, session dropped", state);
            events.publish(InitiatorEvent::DeviceDisconnected {
                peer_id: session.peer_id,
                reason: DisconnectReason::RadioOff,
            });
        }
    }

    fn on_connected<R: CentralRadio + ?Sized>(
        &mut self,
        peer_id: &PeerId,
        radio: &mut R,
        events: &EventPublisher<InitiatorEvent>,
    ) {
        if !self.is_current(peer_id, SessionState::Connecting) {
            debug!(peer = %peer_id, "Ignoring unexpected connect");
            return;
        }
        let Some(handle) = self.advance(SessionState::AttributeDiscovery) else {
            return;
        };
        self.publish_state(events);

        if let Err(e) = radio.discover_attributes(handle, SERVICE_UUID) {
            self.abandon(format!("attribute discovery request failed: {}", e), radio, events);
        }
    }

    fn on_attributes<R: CentralRadio + ?Sized>(
        &mut self,
        peer_id: &PeerId,
        result: Result<Vec<ServiceDefinition>, String>,
        radio: &mut R,
        events: &EventPublisher<InitiatorEvent>,
    ) {
        if !self.is_current(peer_id, SessionState::AttributeDiscovery) {
            debug!(peer = %peer_id, "Ignoring stale attribute discovery");
            return;
        }

        let channels = match result
            .map_err(|reason| format!("attribute discovery failed: {}", reason))
            .and_then(|services| protocol::match_channels(&services).map_err(|e| e.to_string()))
        {
            Ok(channels) => channels,
            Err(reason) => {
                self.abandon(reason, radio, events);
                return;
            }
        };

        if let Some(session) = self.session.as_mut() {
            session.channels = Some(channels);
        }
        let Some(handle) = self.advance(SessionState::Subscribing) else {
            return;
        };
        self.publish_state(events);

        if let Err(e) = radio.subscribe(handle, channels.outbound) {
            self.abandon(format!("subscribe request failed: {}", e), radio, events);
        }
    }

    fn on_subscription<R: CentralRadio + ?Sized>(
        &mut self,
        peer_id: &PeerId,
        attribute: AttributeRef,
        result: Result<bool, String>,
        radio: &mut R,
        events: &EventPublisher<InitiatorEvent>,
    ) {
        let Some(session) = self.session.as_mut().filter(|s| s.peer_id == *peer_id) else {
            debug!(peer = %peer_id, "Ignoring subscription change for torn-down peer");
            return;
        };
        if session.outbound_channel() != Some(attribute) {
            debug!(peer = %peer_id, attribute = %attribute.attribute, "Ignoring foreign attribute");
            return;
        }

        match (session.state, result) {
            (SessionState::Subscribing, Ok(true)) => {
                session.subscribed = true;
                session.state = SessionState::Active;
                info!(peer = %peer_id, "Session active");
                self.publish_state(events);
            }
            (SessionState::Subscribing, Ok(false)) => {
                self.abandon("notifications were not enabled".to_string(), radio, events);
            }
            (SessionState::Subscribing, Err(reason)) => {
                self.abandon(format!("subscribe failed: {}", reason), radio, events);
            }
            (SessionState::Active, Ok(enabled)) => {
                if !enabled {
                    warn!(peer = %peer_id, "Notifications disabled on active session");
                }
                session.subscribed = enabled;
            }
            (state, result) => {
                debug!(peer = %peer_id, %state, ?result, "Ignoring subscription change");
            }
        }
    }

    fn on_notification(
        &mut self,
        peer_id: PeerId,
        attribute: AttributeRef,
        value: &[u8],
        store: &mut MessageStore,
        events: &EventPublisher<InitiatorEvent>,
    ) {
        let accepted = self
            .session
            .as_ref()
            .filter(|s| s.state == SessionState::Active && s.peer_id == peer_id)
            .is_some_and(|s| s.outbound_channel() == Some(attribute));
        if !accepted {
            debug!(peer = %peer_id, "Dropping notification outside an active session");
            return;
        }

        match protocol::decode_text(value) {
            Ok(text) => {
                store.append(MessageRecord::inbound(peer_id.clone(), text.clone()));
                events.publish(InitiatorEvent::MessageReceived { peer_id, text });
            }
            Err(e) => {
                warn!(peer = %peer_id, "Dropping undecodable notification: {}", e);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn is_current(&self, peer_id: &PeerId, state: SessionState) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.peer_id == *peer_id && s.state == state)
    }

    /// Move the session to `state`, returning its handle
    fn advance(&mut self, state: SessionState) -> Option<PeerHandle> {
        let session = self.session.as_mut()?;
        session.state = state;
        Some(session.handle)
    }

    /// Give up on a session during setup and report it as a connection failure
    fn abandon<R: CentralRadio + ?Sized>(
        &mut self,
        reason: String,
        radio: &mut R,
        events: &EventPublisher<InitiatorEvent>,
    ) {
        let Some(session) = self.session.take() else {
            return;
        };
        error!(peer = %session.peer_id, "Session abandoned: {}", reason);
        if let Err(e) = radio.cancel_connection(session.handle) {
            warn!(peer = %session.peer_id, "Cancel connection failed: {}", e);
        }
        events.publish(InitiatorEvent::ConnectionFailed {
            peer_id: session.peer_id,
            reason,
        });
    }

    fn publish_state(&self, events: &EventPublisher<InitiatorEvent>) {
        if let Some(session) = &self.session {
            events.publish(InitiatorEvent::SessionStateChanged {
                peer_id: session.peer_id.clone(),
                state: session.state,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{service_definition, SERVICE_UUID};
    use crate::radio::{Advertisement, PeripheralRadio};
    use crate::sim::VirtualAir;
    use tokio::time::Instant;

    #[test]
    fn test_second_connect_is_busy() {
        let air = VirtualAir::new();
        let (mut peripheral, _peripheral_events) = air.peripheral("p");
        peripheral.register_service(&service_definition()).unwrap();
        peripheral
            .start_advertising(&Advertisement {
                service: SERVICE_UUID,
                local_name: "MacChat".to_string(),
            })
            .unwrap();

        let (mut radio, mut events) = air.central("c");
        radio.start_scan(None).unwrap();
        let Some(CentralEvent::Discovered { handle, .. }) = events.try_recv().ok() else {
            panic!("peripheral not discovered");
        };

        let descriptor = PeerDescriptor {
            id: PeerId::new("p"),
            name: "MacChat".to_string(),
            signal_strength: -50,
            last_seen: Instant::now(),
            handle,
        };
        let publisher = EventPublisher::new(8);
        let mut manager = SessionManager::new(SessionConfig::default());

        manager.connect(&descriptor, &mut radio, &publisher).unwrap();
        assert_eq!(manager.state(), SessionState::Connecting);
        assert_eq!(
            manager.connect(&descriptor, &mut radio, &publisher),
            Err(SessionError::Busy {
                peer_id: "p".to_string()
            })
        );
    }

    #[test]
    fn test_idle_manager_has_nothing_to_tear_down() {
        let air = VirtualAir::new();
        let (mut radio, _events) = air.central("c");
        let publisher = EventPublisher::new(8);
        let mut rx = publisher.subscribe();
        let mut manager = SessionManager::new(SessionConfig::default());

        assert_eq!(manager.state(), SessionState::Idle);
        assert!(!manager.disconnect(&mut radio, &publisher));
        assert!(manager.active_peer().is_none());
        assert!(rx.try_recv().is_err());
    }
}
