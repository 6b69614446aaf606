//! Consumer-facing events and the multi-subscriber publisher
//!
//! Engines never hand out references into their state. Every externally
//! observable change is published as an owned value on a broadcast channel,
//! so any number of consumers can subscribe without displacing each other.

use tokio::sync::broadcast;
use tracing::trace;

use crate::radio::RadioState;
use crate::types::{DisconnectReason, PeerDescriptor, PeerId, SessionState, SubscriberRef};

// ----------------------------------------------------------------------------
// Event Types
// ----------------------------------------------------------------------------

/// Events published by the initiator role
#[derive(Debug, Clone, PartialEq)]
pub enum InitiatorEvent {
    /// Snapshot taken at a scan window boundary, sorted by name
    DevicesUpdated(Vec<PeerDescriptor>),
    /// Inbound notification decoded and recorded
    MessageReceived { peer_id: PeerId, text: String },
    /// A session ended
    DeviceDisconnected {
        peer_id: PeerId,
        reason: DisconnectReason,
    },
    /// Periodic scanning was switched on or off
    ScanningChanged(bool),
    /// A connect attempt or session setup was abandoned
    ConnectionFailed { peer_id: PeerId, reason: String },
    /// Session phase transition
    SessionStateChanged {
        peer_id: PeerId,
        state: SessionState,
    },
    /// The transport rejected a write on the inbound channel
    SendFailed { peer_id: PeerId, reason: String },
}

/// Events published by the responder role
#[derive(Debug, Clone, PartialEq)]
pub enum ResponderEvent {
    /// Inbound write decoded and recorded
    MessageReceived { peer_id: PeerId, text: String },
    SubscriberAdded(SubscriberRef),
    SubscriberRemoved(SubscriberRef),
    AdvertisingChanged(bool),
    RadioStateChanged(RadioState),
    RegistrationFailed(String),
    /// The transport drained its outbound buffer after a failed notify
    ReadyToUpdate,
}

// ----------------------------------------------------------------------------
// Publisher
// ----------------------------------------------------------------------------

/// Broadcast publisher shared by an engine and its handles
#[derive(Debug, Clone)]
pub struct EventPublisher<E> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone + std::fmt::Debug> EventPublisher<E> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<E> {
        self.sender.clone()
    }

    /// Publish to every current subscriber; having none is not an error
    pub fn publish(&self, event: E) {
        trace!(?event, "Publishing event");
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_sees_every_event() {
        let publisher = EventPublisher::new(8);
        let mut first = publisher.subscribe();
        let mut second = publisher.subscribe();

        publisher.publish(InitiatorEvent::ScanningChanged(true));

        assert_eq!(
            first.try_recv().unwrap(),
            InitiatorEvent::ScanningChanged(true)
        );
        assert_eq!(
            second.try_recv().unwrap(),
            InitiatorEvent::ScanningChanged(true)
        );
    }

    #[test]
    fn test_publish_without_subscribers() {
        let publisher: EventPublisher<ResponderEvent> = EventPublisher::new(4);
        publisher.publish(ResponderEvent::ReadyToUpdate);
        assert_eq!(publisher.subscriber_count(), 0);
    }
}
