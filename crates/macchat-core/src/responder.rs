//! Responder role engine
//!
//! Tracks radio readiness (`Unready → Ready`) and, independently, whether the
//! service is being advertised. Entering `Ready` registers the fixed service
//! and starts advertising once registration is confirmed.

use std::fmt;

use tracing::{debug, error, info, warn};

use crate::config::ResponderConfig;
use crate::errors::{RadioError, ResponderError};
use crate::events::{EventPublisher, ResponderEvent};
use crate::message_store::MessageStore;
use crate::protocol::{self, INBOUND_CHANNEL_UUID, OUTBOUND_CHANNEL_UUID, SERVICE_UUID};
use crate::radio::{
    Advertisement, PeripheralEvent, PeripheralRadio, RadioState, UpdateOutcome, WriteRequest,
    WriteStatus,
};
use crate::types::{MessageRecord, PeerId, SubscriberRef};

/// Radio readiness as seen by the responder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Unready,
    Ready,
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Readiness::Unready => f.write_str("unready"),
            Readiness::Ready => f.write_str("ready"),
        }
    }
}

// ----------------------------------------------------------------------------
// Responder Engine
// ----------------------------------------------------------------------------

pub struct ResponderEngine<R> {
    radio: R,
    config: ResponderConfig,
    readiness: Readiness,
    registered: bool,
    advertising: bool,
    subscribers: Vec<SubscriberRef>,
    store: MessageStore,
    events: EventPublisher<ResponderEvent>,
}

impl<R: PeripheralRadio> ResponderEngine<R> {
    pub fn new(radio: R, config: ResponderConfig, events: EventPublisher<ResponderEvent>) -> Self {
        Self {
            radio,
            config,
            readiness: Readiness::Unready,
            registered: false,
            advertising: false,
            subscribers: Vec::new(),
            store: MessageStore::new(),
            events,
        }
    }

    /// Sync with the radio's current power state
    pub fn start(&mut self) {
        let state = self.radio.state();
        self.on_radio_state(state);
    }

    pub fn events(&self) -> &EventPublisher<ResponderEvent> {
        &self.events
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn is_ready(&self) -> bool {
        self.readiness == Readiness::Ready
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    pub fn subscribers(&self) -> &[SubscriberRef] {
        &self.subscribers
    }

    pub fn messages(&self, peer_id: &PeerId) -> Vec<String> {
        self.store.messages(peer_id)
    }

    pub fn history(&self, peer_id: &PeerId) -> Vec<MessageRecord> {
        self.store.records(peer_id).to_vec()
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Push `text` to every subscriber as one outbound update.
    ///
    /// A full transport buffer is returned as [`ResponderError::BufferFull`];
    /// nothing is queued or retried.
    pub fn notify(&mut self, text: &str) -> Result<(), ResponderError> {
        if !self.is_ready() {
            warn!("Radio not ready, notify skipped");
            return Err(ResponderError::NotReady);
        }
        let payload = protocol::encode_text(text);
        if payload.len() > self.config.max_payload_len {
            return Err(ResponderError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_len,
            });
        }
        if self.subscribers.is_empty() {
            debug!("Notify with no subscribers");
            return Err(ResponderError::NoSubscribers);
        }

        // A stale duplicate entry must not turn one notify into two deliveries
        let mut targets: Vec<SubscriberRef> = Vec::with_capacity(self.subscribers.len());
        for subscriber in &self.subscribers {
            if !targets.contains(subscriber) {
                targets.push(subscriber.clone());
            }
        }

        match self
            .radio
            .update_value(OUTBOUND_CHANNEL_UUID, &payload, &targets)
        {
            UpdateOutcome::Sent => {
                for subscriber in &targets {
                    self.store
                        .append(MessageRecord::outbound(subscriber.peer_id().clone(), text));
                }
                debug!(subscribers = targets.len(), bytes = payload.len(), "Notified");
                Ok(())
            }
            UpdateOutcome::BufferFull => {
                warn!("Outbound buffer full, notify dropped");
                Err(ResponderError::BufferFull)
            }
        }
    }

    pub fn start_advertising(&mut self) -> Result<(), ResponderError> {
        if !self.is_ready() {
            warn!("Radio not ready, advertising skipped");
            return Err(ResponderError::NotReady);
        }
        if !self.registered {
            return Err(ResponderError::RegistrationFailed(
                "service is not registered".to_string(),
            ));
        }
        if self.advertising {
            return Ok(());
        }
        let advertisement = Advertisement {
            service: SERVICE_UUID,
            local_name: self.config.local_name.clone(),
        };
        self.radio.start_advertising(&advertisement)?;
        Ok(())
    }

    /// Halt broadcast; existing subscriptions are left in place
    pub fn stop_advertising(&mut self) -> Result<(), ResponderError> {
        if !self.advertising {
            return Ok(());
        }
        self.radio.stop_advertising()?;
        self.advertising = false;
        info!("Advertising stopped");
        self.events.publish(ResponderEvent::AdvertisingChanged(false));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Hardware Events
    // ------------------------------------------------------------------------

    pub fn handle_event(&mut self, event: PeripheralEvent) {
        match event {
            PeripheralEvent::StateChanged(state) => self.on_radio_state(state),
            PeripheralEvent::ServiceRegistered { error } => self.on_registered(error),
            PeripheralEvent::AdvertisingStarted { error: None } => {
                if !self.advertising {
                    self.advertising = true;
                    info!(name = %self.config.local_name, "Advertising");
                    self.events.publish(ResponderEvent::AdvertisingChanged(true));
                }
            }
            PeripheralEvent::AdvertisingStarted { error: Some(reason) } => {
                error!("Advertising failed: {}", reason);
                self.advertising = false;
            }
            PeripheralEvent::Subscribed {
                subscriber,
                attribute,
            } => {
                if attribute != OUTBOUND_CHANNEL_UUID {
                    debug!(%attribute, "Ignoring subscription to foreign attribute");
                    return;
                }
                info!(peer = %subscriber.peer_id(), "Subscriber added");
                self.subscribers.push(subscriber.clone());
                self.events.publish(ResponderEvent::SubscriberAdded(subscriber));
            }
            PeripheralEvent::Unsubscribed {
                subscriber,
                attribute,
            } => {
                if attribute != OUTBOUND_CHANNEL_UUID {
                    return;
                }
                // Only the first matching entry goes; duplicates from repeated
                // subscribe events stay behind.
                if let Some(index) = self.subscribers.iter().position(|s| *s == subscriber) {
                    self.subscribers.remove(index);
                    info!(peer = %subscriber.peer_id(), "Subscriber removed");
                    self.events
                        .publish(ResponderEvent::SubscriberRemoved(subscriber));
                }
            }
            PeripheralEvent::WriteRequests(requests) => {
                for request in requests {
                    self.on_write(request);
                }
            }
            PeripheralEvent::ReadyToUpdate => {
                debug!("Transport ready for more updates");
                self.events.publish(ResponderEvent::ReadyToUpdate);
            }
        }
    }

    fn on_radio_state(&mut self, state: RadioState) {
        self.events.publish(ResponderEvent::RadioStateChanged(state));

        match (self.readiness, state.is_ready()) {
            (Readiness::Unready, true) => {
                self.readiness = Readiness::Ready;
                info!("Peripheral radio ready, registering service");
                let service = protocol::service_definition();
                match self.radio.register_service(&service) {
                    Ok(()) => {}
                    Err(RadioError::NotReady) => warn!("Radio not ready, registration skipped"),
                    Err(e) => self.registration_failed(e.to_string()),
                }
            }
            (Readiness::Ready, false) => {
                warn!("Peripheral radio {}", state);
                self.readiness = Readiness::Unready;
                self.registered = false;
                if self.advertising {
                    self.advertising = false;
                    self.events.publish(ResponderEvent::AdvertisingChanged(false));
                }
                for subscriber in self.subscribers.drain(..) {
                    self.events.publish(ResponderEvent::SubscriberRemoved(subscriber));
                }
            }
            _ => debug!(readiness = %self.readiness, "Peripheral radio {}", state),
        }
    }

    fn on_registered(&mut self, error: Option<String>) {
        if let Some(reason) = error {
            self.registration_failed(reason);
            return;
        }
        if !self.is_ready() {
            debug!("Registration confirmed after power loss, ignoring");
            return;
        }
        self.registered = true;
        debug!("Service registered");
        if let Err(e) = self.start_advertising() {
            warn!("Could not start advertising: {}", e);
        }
    }

    fn registration_failed(&mut self, reason: String) {
        error!("Service registration failed: {}", reason);
        self.registered = false;
        self.events
            .publish(ResponderEvent::RegistrationFailed(reason));
    }

    fn on_write(&mut self, request: WriteRequest) {
        let status = if request.attribute == INBOUND_CHANNEL_UUID {
            match protocol::decode_text(&request.value) {
                Ok(text) => {
                    self.store
                        .append(MessageRecord::inbound(request.from.clone(), text.clone()));
                    self.events.publish(ResponderEvent::MessageReceived {
                        peer_id: request.from.clone(),
                        text,
                    });
                }
                Err(e) => warn!(peer = %request.from, "Dropping undecodable write: {}", e),
            }
            WriteStatus::Success
        } else {
            debug!(attribute = %request.attribute, "Write to unsupported attribute");
            WriteStatus::RequestNotSupported
        };

        if let Err(e) = self.radio.respond(request.id, status) {
            warn!(peer = %request.from, "Failed to acknowledge write: {}", e);
        }
    }
}
