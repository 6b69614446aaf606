//! Initiator role engine
//!
//! Ties the scan scheduler, device registry, session manager and message
//! store to one central radio. The engine is synchronous and clock-free: the
//! caller passes `now` into every time-sensitive call, which keeps the whole
//! role deterministic under test.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::MacchatConfig;
use crate::errors::{ConfigError, SessionError};
use crate::events::{EventPublisher, InitiatorEvent};
use crate::message_store::MessageStore;
use crate::protocol::UNKNOWN_PEER_NAME;
use crate::radio::{CentralEvent, CentralRadio, RadioState};
use crate::registry::DeviceRegistry;
use crate::scheduler::ScanScheduler;
use crate::session::{Session, SessionManager};
use crate::types::{MessageRecord, PeerDescriptor, PeerId, SessionState};

pub struct InitiatorEngine<R> {
    radio: R,
    registry: DeviceRegistry,
    scheduler: ScanScheduler,
    session: SessionManager,
    store: MessageStore,
    events: EventPublisher<InitiatorEvent>,
}

impl<R: CentralRadio> InitiatorEngine<R> {
    pub fn new(radio: R, config: &MacchatConfig, events: EventPublisher<InitiatorEvent>) -> Self {
        Self {
            radio,
            registry: DeviceRegistry::new(),
            scheduler: ScanScheduler::new(&config.scan),
            session: SessionManager::new(config.session.clone()),
            store: MessageStore::new(),
            events,
        }
    }

    pub fn events(&self) -> &EventPublisher<InitiatorEvent> {
        &self.events
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_state(&self) -> RadioState {
        self.radio.state()
    }

    // ------------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------------

    pub fn start_scanning(&mut self, now: Instant) {
        if self.scheduler.start(&mut self.radio, now) {
            self.events.publish(InitiatorEvent::ScanningChanged(true));
        }
    }

    pub fn stop_scanning(&mut self) {
        if let Some(snapshot) = self.scheduler.stop(&mut self.radio) {
            self.events.publish(InitiatorEvent::ScanningChanged(false));
            self.events.publish(InitiatorEvent::DevicesUpdated(snapshot));
        }
    }

    pub fn set_scan_interval(&mut self, interval: Duration, now: Instant) -> Result<(), ConfigError> {
        self.scheduler.set_interval(interval, now)
    }

    pub fn is_scanning(&self) -> bool {
        self.scheduler.is_scanning()
    }

    pub fn scan_interval(&self) -> Duration {
        self.scheduler.interval()
    }

    /// Instant at which [`poll`](Self::poll) next has scheduled work
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Fire due scan window closes and cycle starts
    pub fn poll(&mut self, now: Instant) {
        if let Some(snapshot) = self.scheduler.poll(&mut self.radio, &mut self.registry, now) {
            self.events.publish(InitiatorEvent::DevicesUpdated(snapshot));
        }
    }

    /// Device list as of the last closed scan window
    pub fn devices(&self) -> Vec<PeerDescriptor> {
        self.scheduler.last_snapshot().to_vec()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------------

    /// Connect to a discovered peer, replacing any session with another peer
    pub fn select_peer(&mut self, peer_id: &PeerId) -> Result<(), SessionError> {
        if self.session.peer_id() == Some(peer_id) {
            debug!(peer = %peer_id, "Peer already selected");
            return Ok(());
        }
        let descriptor = self
            .registry
            .get(peer_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownPeer {
                peer_id: peer_id.to_string(),
            })?;
        self.session
            .select_peer(&descriptor, &mut self.radio, &self.events)
    }

    pub fn disconnect(&mut self) -> bool {
        self.session.disconnect(&mut self.radio, &self.events)
    }

    pub fn send(&mut self, peer_id: &PeerId, text: &str) -> Result<(), SessionError> {
        self.session
            .send(peer_id, text, &mut self.radio, &mut self.store)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.session()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn active_peer(&self) -> Option<&PeerId> {
        self.session.active_peer()
    }

    // ------------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------------

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
    // Hardware Events
    // ------------------------------------------------------------------------

    /// Process one hardware callback received at `now`
    pub fn handle_event(&mut self, event: CentralEvent, now: Instant) {
        match event {
            CentralEvent::Discovered {
                peer_id,
                name,
                rssi,
                handle,
            } => {
                let name = name
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| UNKNOWN_PEER_NAME.to_string());
                debug!(peer = %peer_id, %name, rssi, "Discovered");
                self.registry.upsert(PeerDescriptor {
                    id: peer_id,
                    name,
                    signal_strength: rssi,
                    last_seen: now,
                    handle,
                });
            }
            CentralEvent::StateChanged(state) => {
                info!("Central radio {}", state);
                self.session
                    .handle_event(event, &mut self.radio, &mut self.store, &self.events);
            }
            other => self
                .session
                .handle_event(other, &mut self.radio, &mut self.store, &self.events),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::VirtualAir;
    use crate::types::PeerHandle;

    fn engine(air: &VirtualAir) -> InitiatorEngine<crate::sim::SimCentral> {
        let (radio, _events) = air.central("central");
        InitiatorEngine::new(radio, &MacchatConfig::default(), EventPublisher::new(64))
    }

    #[test]
    fn test_discovery_fills_registry_without_publishing() {
        let air = VirtualAir::new();
        let mut engine = engine(&air);
        let mut rx = engine.events().subscribe();
        let now = Instant::now();

        engine.handle_event(
            CentralEvent::Discovered {
                peer_id: PeerId::new("p1"),
                name: None,
                rssi: -70,
                handle: PeerHandle::new(7),
            },
            now,
        );

        let stored = engine.registry().get(&PeerId::new("p1")).unwrap();
        assert_eq!(stored.name, UNKNOWN_PEER_NAME);
        assert_eq!(stored.last_seen, now);
        assert!(engine.devices().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_select_unknown_peer() {
        let air = VirtualAir::new();
        let mut engine = engine(&air);

        let result = engine.select_peer(&PeerId::new("ghost"));
        assert!(matches!(result, Err(SessionError::UnknownPeer { .. })));
        assert_eq!(engine.session_state(), SessionState::Idle);
    }

    #[test]
    fn test_scanning_toggle_events() {
        let air = VirtualAir::new();
        let mut engine = engine(&air);
        let mut rx = engine.events().subscribe();
        let now = Instant::now();

        engine.start_scanning(now);
        engine.start_scanning(now);
        engine.stop_scanning();

        assert_eq!(rx.try_recv().unwrap(), InitiatorEvent::ScanningChanged(true));
        assert_eq!(rx.try_recv().unwrap(), InitiatorEvent::ScanningChanged(false));
        assert_eq!(rx.try_recv().unwrap(), InitiatorEvent::DevicesUpdated(vec![]));
        assert!(rx.try_recv().is_err());
    }
}
