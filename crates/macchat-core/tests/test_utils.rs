//! Shared rig for driving both MacChat roles over the simulated radio
//!
//! The rig owns one initiator and any number of responders linked through a
//! [`VirtualAir`]. Time only moves when a test calls [`Rig::advance`], and
//! hardware callbacks are delivered in bulk by [`Rig::pump`].

#![allow(dead_code)]

use std::time::Duration;

use macchat_core::sim::{SimCentral, SimPeripheral, VirtualAir};
use macchat_core::*;
use tokio::sync::broadcast;
use tokio::time::Instant;

pub const CENTRAL: &str = "initiator";

// ----------------------------------------------------------------------------
// Responder Slot
// ----------------------------------------------------------------------------

pub struct Responder {
    pub id: PeerId,
    pub engine: ResponderEngine<SimPeripheral>,
    pub events: broadcast::Receiver<ResponderEvent>,
    radio_events: PeripheralEventReceiver,
}

// ----------------------------------------------------------------------------
// Rig
// ----------------------------------------------------------------------------

pub struct Rig {
    pub air: VirtualAir,
    pub initiator: InitiatorEngine<SimCentral>,
    pub events: broadcast::Receiver<InitiatorEvent>,
    pub responders: Vec<Responder>,
    radio_events: CentralEventReceiver,
    pub now: Instant,
}

impl Rig {
    /// One initiator plus a powered-on, not yet started responder per name
    pub fn new(responders: &[&str]) -> Self {
        Self::with_config(responders, MacchatConfig::default())
    }

    pub fn with_config(responders: &[&str], config: MacchatConfig) -> Self {
        let air = VirtualAir::new();
        let (central, radio_events) = air.central(CENTRAL);
        let publisher = EventPublisher::new(256);
        let events = publisher.subscribe();
        let initiator = InitiatorEngine::new(central, &config, publisher);

        let responders = responders
            .iter()
            .map(|name| {
                let (radio, radio_events) = air.peripheral(*name);
                let publisher = EventPublisher::new(256);
                let events = publisher.subscribe();
                Responder {
                    id: PeerId::new(*name),
                    engine: ResponderEngine::new(radio, config.responder.clone(), publisher),
                    events,
                    radio_events,
                }
            })
            .collect();

        Self {
            air,
            initiator,
            events,
            responders,
            radio_events,
            now: Instant::now(),
        }
    }

    pub fn central_id(&self) -> PeerId {
        PeerId::new(CENTRAL)
    }

    pub fn responder(&mut self, name: &str) -> &mut Responder {
        self.responders
            .iter_mut()
            .find(|r| r.id.as_str() == name)
            .expect("unknown responder")
    }

    /// Deliver queued hardware callbacks until both sides go quiet
    pub fn pump(&mut self) {
        loop {
            let mut delivered = false;
            while let Ok(event) = self.radio_events.try_recv() {
                self.initiator.handle_event(event, self.now);
                delivered = true;
            }
            for responder in &mut self.responders {
                while let Ok(event) = responder.radio_events.try_recv() {
                    responder.engine.handle_event(event);
                    delivered = true;
                }
            }
            if !delivered {
                break;
            }
        }
    }

    /// Move the clock forward, fire scheduled scan work and settle
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
        self.initiator.poll(self.now);
        self.pump();
    }

    /// Start every responder engine so each registers and advertises
    pub fn start_responders(&mut self) {
        for responder in &mut self.responders {
            responder.engine.start();
        }
        self.pump();
    }

    /// Run one complete scan window with default timing
    pub fn scan_once(&mut self) {
        self.initiator.start_scanning(self.now);
        self.pump();
        self.advance(Duration::from_secs(3));
    }

    /// Start responders, scan, and bring a session with `name` to `Active`
    pub fn connect(&mut self, name: &str) {
        self.start_responders();
        self.scan_once();
        self.initiator
            .select_peer(&PeerId::new(name))
            .expect("select peer");
        self.pump();
        assert_eq!(self.initiator.session_state(), SessionState::Active);
    }
}

/// Everything currently queued on a broadcast receiver
pub fn drain<E: Clone>(rx: &mut broadcast::Receiver<E>) -> Vec<E> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}
