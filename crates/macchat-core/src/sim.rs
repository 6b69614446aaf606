//! In-process simulated radio
//!
//! A [`VirtualAir`] links any number of simulated centrals and peripherals.
//! Requests are answered synchronously by pushing the matching callbacks onto
//! each side's event queue, so a test can drive both roles step by step or
//! hand the queues to the async services. Power, visibility, registration
//! failure and transport backpressure are all controllable.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use crate::errors::RadioError;
use crate::protocol::{AttributeRef, ServiceDefinition};
use crate::radio::{
    Advertisement, CentralEvent, CentralEventReceiver, CentralEventSender, CentralRadio,
    PeripheralEvent, PeripheralEventReceiver, PeripheralEventSender, PeripheralRadio, RadioState,
    UpdateOutcome, WriteRequest, WriteStatus,
};
use crate::types::{PeerHandle, PeerId, RequestId, SubscriberRef};

/// Signal strength reported for simulated peripherals unless overridden
pub const DEFAULT_RSSI: i16 = -50;

// ============================================================================
// Shared Air State
// ============================================================================

struct CentralNode {
    state: RadioState,
    events: CentralEventSender,
    scan_filter: Option<Option<Uuid>>,
    handles: HashMap<PeerId, PeerHandle>,
    next_handle: u64,
    links: HashSet<PeerId>,
}

impl CentralNode {
    fn handle_for(&mut self, peripheral: &PeerId) -> PeerHandle {
        if let Some(handle) = self.handles.get(peripheral) {
            return *handle;
        }
        self.next_handle += 1;
        let handle = PeerHandle::new(self.next_handle);
        self.handles.insert(peripheral.clone(), handle);
        handle
    }

    fn peer_for(&self, handle: PeerHandle) -> Result<PeerId, RadioError> {
        self.handles
            .iter()
            .find(|(_, h)| **h == handle)
            .map(|(id, _)| id.clone())
            .ok_or(RadioError::UnknownPeer {
                handle: handle.raw(),
            })
    }

    fn emit(&self, event: CentralEvent) {
        let _ = self.events.send(event);
    }
}

struct PeripheralNode {
    state: RadioState,
    events: PeripheralEventSender,
    service: Option<ServiceDefinition>,
    advertisement: Option<Advertisement>,
    visible: bool,
    rssi: i16,
    buffer_full: bool,
    registration_error: Option<String>,
    subscribers: HashSet<PeerId>,
    responses: Vec<(RequestId, WriteStatus)>,
}

impl PeripheralNode {
    fn is_discoverable(&self, filter: Option<Uuid>) -> bool {
        if !self.visible || !self.state.is_ready() {
            return false;
        }
        match (&self.advertisement, filter) {
            (Some(adv), Some(service)) => adv.service == service,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    fn emit(&self, event: PeripheralEvent) {
        let _ = self.events.send(event);
    }
}

#[derive(Default)]
struct Air {
    centrals: HashMap<PeerId, CentralNode>,
    peripherals: HashMap<PeerId, PeripheralNode>,
    next_request: u64,
}

impl Air {
    /// Emit discovery hits for everything `central` can currently see
    fn sweep(&mut self, central: &PeerId) {
        let Some(node) = self.centrals.get_mut(central) else {
            return;
        };
        let Some(filter) = node.scan_filter else {
            return;
        };
        for (id, peripheral) in &self.peripherals {
            if !peripheral.is_discoverable(filter) {
                continue;
            }
            let handle = node.handle_for(id);
            node.emit(CentralEvent::Discovered {
                peer_id: id.clone(),
                name: peripheral
                    .advertisement
                    .as_ref()
                    .map(|adv| adv.local_name.clone()),
                rssi: peripheral.rssi,
                handle,
            });
        }
    }

    /// Tear down a link, notifying each side that is still listening
    fn unlink(&mut self, central: &PeerId, peripheral: &PeerId, error: Option<String>) -> bool {
        let linked = self
            .centrals
            .get_mut(central)
            .is_some_and(|node| node.links.remove(peripheral));
        if !linked {
            return false;
        }
        if let Some(node) = self.centrals.get(central) {
            node.emit(CentralEvent::Disconnected {
                peer_id: peripheral.clone(),
                error,
            });
        }
        self.drop_subscription(central, peripheral);
        true
    }

    fn drop_subscription(&mut self, central: &PeerId, peripheral: &PeerId) {
        let Some(node) = self.peripherals.get_mut(peripheral) else {
            return;
        };
        if !node.subscribers.remove(central) {
            return;
        }
        if let Some(service) = &node.service {
            for attribute in service.attributes.iter().filter(|a| a.properties.can_notify()) {
                node.emit(PeripheralEvent::Unsubscribed {
                    subscriber: SubscriberRef::new(central.clone()),
                    attribute: attribute.uuid,
                });
            }
        }
    }

    fn linked_peripheral(
        &self,
        central: &PeerId,
        handle: PeerHandle,
    ) -> Result<(PeerId, bool), RadioError> {
        let node = self.centrals.get(central).ok_or(RadioError::NotReady)?;
        if !node.state.is_ready() {
            return Err(RadioError::NotReady);
        }
        let peer = node.peer_for(handle)?;
        let linked = node.links.contains(&peer);
        Ok((peer, linked))
    }
}

// ============================================================================
// Virtual Air
// ============================================================================

/// Shared medium for simulated radios
#[derive(Clone, Default)]
pub struct VirtualAir {
    air: Arc<Mutex<Air>>,
}

impl VirtualAir {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Air> {
        self.air.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a powered-on central and return its radio and event queue
    pub fn central(&self, id: impl Into<PeerId>) -> (SimCentral, CentralEventReceiver) {
        let id = id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().centrals.insert(
            id.clone(),
            CentralNode {
                state: RadioState::PoweredOn,
                events: tx,
                scan_filter: None,
                handles: HashMap::new(),
                next_handle: 0,
                links: HashSet::new(),
            },
        );
        (
            SimCentral {
                id,
                air: self.clone(),
            },
            rx,
        )
    }

    /// Add a powered-on peripheral and return its radio and event queue
    pub fn peripheral(&self, id: impl Into<PeerId>) -> (SimPeripheral, PeripheralEventReceiver) {
        let id = id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().peripherals.insert(
            id.clone(),
            PeripheralNode {
                state: RadioState::PoweredOn,
                events: tx,
                service: None,
                advertisement: None,
                visible: true,
                rssi: DEFAULT_RSSI,
                buffer_full: false,
                registration_error: None,
                subscribers: HashSet::new(),
                responses: Vec::new(),
            },
        );
        (
            SimPeripheral {
                id,
                air: self.clone(),
            },
            rx,
        )
    }

    /// Change a radio's power state; anything not powered on loses its links
    pub fn set_power(&self, id: &PeerId, state: RadioState) {
        let mut air = self.lock();

        if let Some(node) = air.centrals.get_mut(id) {
            node.state = state;
            node.emit(CentralEvent::StateChanged(state));
            if !state.is_ready() {
                node.scan_filter = None;
                let links: Vec<PeerId> = node.links.drain().collect();
                for peripheral in links {
                    air.drop_subscription(id, &peripheral);
                }
            }
            return;
        }

        let Some(node) = air.peripherals.get_mut(id) else {
            return;
        };
        node.state = state;
        node.emit(PeripheralEvent::StateChanged(state));
        if state.is_ready() {
            return;
        }
        node.service = None;
        node.advertisement = None;
        node.subscribers.clear();
        let centrals: Vec<PeerId> = air
            .centrals
            .iter()
            .filter(|(_, c)| c.links.contains(id))
            .map(|(cid, _)| cid.clone())
            .collect();
        for central in centrals {
            air.unlink(&central, id, Some("peer powered off".to_string()));
        }
    }

    /// Hide or reveal a peripheral from scanners without touching its links
    pub fn set_visible(&self, peripheral: &PeerId, visible: bool) {
        if let Some(node) = self.lock().peripherals.get_mut(peripheral) {
            node.visible = visible;
        }
    }

    pub fn set_rssi(&self, peripheral: &PeerId, rssi: i16) {
        if let Some(node) = self.lock().peripherals.get_mut(peripheral) {
            node.rssi = rssi;
        }
    }

    /// Make value updates fail; clearing it signals readiness to the peripheral
    pub fn set_buffer_full(&self, peripheral: &PeerId, full: bool) {
        if let Some(node) = self.lock().peripherals.get_mut(peripheral) {
            let drained = node.buffer_full && !full;
            node.buffer_full = full;
            if drained {
                node.emit(PeripheralEvent::ReadyToUpdate);
            }
        }
    }

    /// Fail the next service registrations with `reason`, or stop failing
    pub fn reject_registration(&self, peripheral: &PeerId, reason: Option<String>) {
        if let Some(node) = self.lock().peripherals.get_mut(peripheral) {
            node.registration_error = reason;
        }
    }

    /// Drop a link as if the peers moved out of range
    pub fn drop_link(&self, central: &PeerId, peripheral: &PeerId) -> bool {
        self.lock()
            .unlink(central, peripheral, Some("link lost".to_string()))
    }

    /// Repeat advertisement reception for every scanning central
    pub fn advertise_tick(&self) {
        let mut air = self.lock();
        let centrals: Vec<PeerId> = air.centrals.keys().cloned().collect();
        for central in centrals {
            air.sweep(&central);
        }
    }

    /// Inject a raw write from `central`, bypassing encoding
    pub fn inject_write(&self, central: &PeerId, peripheral: &PeerId, attribute: Uuid, value: &[u8]) {
        let mut air = self.lock();
        air.next_request += 1;
        let id = RequestId::new(air.next_request);
        if let Some(node) = air.peripherals.get(peripheral) {
            node.emit(PeripheralEvent::WriteRequests(vec![WriteRequest {
                id,
                from: central.clone(),
                attribute,
                value: value.to_vec(),
            }]));
        }
    }

    pub fn is_advertising(&self, peripheral: &PeerId) -> bool {
        self.lock()
            .peripherals
            .get(peripheral)
            .is_some_and(|node| node.advertisement.is_some())
    }

    pub fn is_scanning(&self, central: &PeerId) -> bool {
        self.lock()
            .centrals
            .get(central)
            .is_some_and(|node| node.scan_filter.is_some())
    }

    pub fn is_linked(&self, central: &PeerId, peripheral: &PeerId) -> bool {
        self.lock()
            .centrals
            .get(central)
            .is_some_and(|node| node.links.contains(peripheral))
    }

    /// Write acknowledgements a peripheral has sent, oldest first
    pub fn responses(&self, peripheral: &PeerId) -> Vec<(RequestId, WriteStatus)> {
        self.lock()
            .peripherals
            .get(peripheral)
            .map(|node| node.responses.clone())
            .unwrap_or_default()
    }
}

// ============================================================================
// Simulated Central
// ============================================================================

pub struct SimCentral {
    id: PeerId,
    air: VirtualAir,
}

impl SimCentral {
    pub fn id(&self) -> &PeerId {
        &self.id
    }
}

impl CentralRadio for SimCentral {
    fn state(&self) -> RadioState {
        self.air
            .lock()
            .centrals
            .get(&self.id)
            .map_or(RadioState::Unknown, |node| node.state)
    }

    fn start_scan(&mut self, service: Option<Uuid>) -> Result<(), RadioError> {
        let mut air = self.air.lock();
        let node = air.centrals.get_mut(&self.id).ok_or(RadioError::NotReady)?;
        if !node.state.is_ready() {
            return Err(RadioError::NotReady);
        }
        node.scan_filter = Some(service);
        trace!(central = %self.id, "Scan started");
        air.sweep(&self.id);
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), RadioError> {
        let mut air = self.air.lock();
        let node = air.centrals.get_mut(&self.id).ok_or(RadioError::NotReady)?;
        if !node.state.is_ready() {
            return Err(RadioError::NotReady);
        }
        node.scan_filter = None;
        Ok(())
    }

    fn connect(&mut self, peer: PeerHandle) -> Result<(), RadioError> {
        let mut air = self.air.lock();
        let (peripheral, _) = air.linked_peripheral(&self.id, peer)?;
        let reachable = air
            .peripherals
            .get(&peripheral)
            .is_some_and(|node| node.state.is_ready() && node.service.is_some());

        let Some(node) = air.centrals.get_mut(&self.id) else {
            return Err(RadioError::NotReady);
        };
        if reachable {
            node.links.insert(peripheral.clone());
            node.emit(CentralEvent::Connected { peer_id: peripheral });
        } else {
            node.emit(CentralEvent::ConnectFailed {
                peer_id: peripheral,
                reason: "peer unreachable".to_string(),
            });
        }
        Ok(())
    }

    fn cancel_connection(&mut self, peer: PeerHandle) -> Result<(), RadioError> {
        let mut air = self.air.lock();
        let (peripheral, linked) = air.linked_peripheral(&self.id, peer)?;
        if linked {
            air.unlink(&self.id, &peripheral, None);
        }
        Ok(())
    }

    fn discover_attributes(&mut self, peer: PeerHandle, service: Uuid) -> Result<(), RadioError> {
        let air = self.air.lock();
        let (peripheral, linked) = air.linked_peripheral(&self.id, peer)?;
        let result = if linked {
            Ok(air
                .peripherals
                .get(&peripheral)
                .and_then(|node| node.service.clone())
                .filter(|definition| definition.uuid == service)
                .into_iter()
                .collect())
        } else {
            Err("not connected".to_string())
        };
        if let Some(node) = air.centrals.get(&self.id) {
            node.emit(CentralEvent::AttributesDiscovered {
                peer_id: peripheral,
                result,
            });
        }
        Ok(())
    }

    fn subscribe(&mut self, peer: PeerHandle, attribute: AttributeRef) -> Result<(), RadioError> {
        let mut air = self.air.lock();
        let (peripheral, linked) = air.linked_peripheral(&self.id, peer)?;

        let result = match air.peripherals.get_mut(&peripheral) {
            Some(node) if linked => {
                let notifiable = node
                    .service
                    .as_ref()
                    .filter(|s| s.uuid == attribute.service)
                    .and_then(|s| s.attribute(attribute.attribute))
                    .is_some_and(|a| a.properties.can_notify());
                if notifiable {
                    if node.subscribers.insert(self.id.clone()) {
                        node.emit(PeripheralEvent::Subscribed {
                            subscriber: SubscriberRef::new(self.id.clone()),
                            attribute: attribute.attribute,
                        });
                    }
                    Ok(true)
                } else {
                    Err("attribute does not support notifications".to_string())
                }
            }
            _ => Err("not connected".to_string()),
        };

        if let Some(node) = air.centrals.get(&self.id) {
            node.emit(CentralEvent::SubscriptionChanged {
                peer_id: peripheral,
                attribute,
                result,
            });
        }
        Ok(())
    }

    fn write(
        &mut self,
        peer: PeerHandle,
        attribute: AttributeRef,
        value: &[u8],
    ) -> Result<(), RadioError> {
        let mut air = self.air.lock();
        let (peripheral, linked) = air.linked_peripheral(&self.id, peer)?;

        let error = if linked {
            air.next_request += 1;
            let id = RequestId::new(air.next_request);
            if let Some(node) = air.peripherals.get(&peripheral) {
                node.emit(PeripheralEvent::WriteRequests(vec![WriteRequest {
                    id,
                    from: self.id.clone(),
                    attribute: attribute.attribute,
                    value: value.to_vec(),
                }]));
            }
            None
        } else {
            Some("not connected".to_string())
        };

        if let Some(node) = air.centrals.get(&self.id) {
            node.emit(CentralEvent::WriteCompleted {
                peer_id: peripheral,
                attribute,
                error,
            });
        }
        Ok(())
    }
}

// ============================================================================
// Simulated Peripheral
// ============================================================================

pub struct SimPeripheral {
    id: PeerId,
    air: VirtualAir,
}

impl SimPeripheral {
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    fn ready_node<'a>(&self, air: &'a mut Air) -> Result<&'a mut PeripheralNode, RadioError> {
        air.peripherals
            .get_mut(&self.id)
            .filter(|node| node.state.is_ready())
            .ok_or(RadioError::NotReady)
    }
}

impl PeripheralRadio for SimPeripheral {
    fn state(&self) -> RadioState {
        self.air
            .lock()
            .peripherals
            .get(&self.id)
            .map_or(RadioState::Unknown, |node| node.state)
    }

    fn register_service(&mut self, service: &ServiceDefinition) -> Result<(), RadioError> {
        let mut air = self.air.lock();
        let node = self.ready_node(&mut air)?;
        match node.registration_error.clone() {
            Some(reason) => node.emit(PeripheralEvent::ServiceRegistered {
                error: Some(reason),
            }),
            None => {
                node.service = Some(service.clone());
                node.emit(PeripheralEvent::ServiceRegistered { error: None });
            }
        }
        Ok(())
    }

    fn start_advertising(&mut self, advertisement: &Advertisement) -> Result<(), RadioError> {
        let mut air = self.air.lock();
        let node = self.ready_node(&mut air)?;
        node.advertisement = Some(advertisement.clone());
        node.emit(PeripheralEvent::AdvertisingStarted { error: None });
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<(), RadioError> {
        let mut air = self.air.lock();
        let node = self.ready_node(&mut air)?;
        node.advertisement = None;
        Ok(())
    }

    fn update_value(
        &mut self,
        attribute: Uuid,
        value: &[u8],
        subscribers: &[SubscriberRef],
    ) -> UpdateOutcome {
        let air = self.air.lock();
        let Some(node) = air.peripherals.get(&self.id) else {
            return UpdateOutcome::BufferFull;
        };
        if node.buffer_full || !node.state.is_ready() {
            return UpdateOutcome::BufferFull;
        }
        let Some(service) = node.service.as_ref() else {
            return UpdateOutcome::BufferFull;
        };
        let reference = AttributeRef::new(service.uuid, attribute);

        for subscriber in subscribers {
            let central = subscriber.peer_id();
            if !node.subscribers.contains(central) {
                continue;
            }
            if let Some(target) = air.centrals.get(central) {
                if target.links.contains(&self.id) {
                    target.emit(CentralEvent::Notification {
                        peer_id: self.id.clone(),
                        attribute: reference,
                        value: value.to_vec(),
                    });
                }
            }
        }
        UpdateOutcome::Sent
    }

    fn respond(&mut self, request: RequestId, status: WriteStatus) -> Result<(), RadioError> {
        let mut air = self.air.lock();
        let node = air
            .peripherals
            .get_mut(&self.id)
            .ok_or(RadioError::NotReady)?;
        node.responses.push((request, status));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{service_definition, OUTBOUND_CHANNEL_UUID, SERVICE_UUID};

    fn advertise(radio: &mut SimPeripheral) {
        radio.register_service(&service_definition()).unwrap();
        radio
            .start_advertising(&Advertisement {
                service: SERVICE_UUID,
                local_name: "MacChat".to_string(),
            })
            .unwrap();
    }

    #[test]
    fn test_scan_sees_only_matching_advertisers() {
        let air = VirtualAir::new();
        let (mut central, mut central_rx) = air.central("c");
        let (mut chat, _) = air.peripheral("chat");
        let (_silent, _) = air.peripheral("silent");
        advertise(&mut chat);

        central.start_scan(Some(SERVICE_UUID)).unwrap();

        match central_rx.try_recv().unwrap() {
            CentralEvent::Discovered { peer_id, name, rssi, .. } => {
                assert_eq!(peer_id, PeerId::new("chat"));
                assert_eq!(name.as_deref(), Some("MacChat"));
                assert_eq!(rssi, DEFAULT_RSSI);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(central_rx.try_recv().is_err());
    }

    #[test]
    fn test_handles_are_stable_per_central() {
        let air = VirtualAir::new();
        let (mut central, mut rx) = air.central("c");
        let (mut chat, _) = air.peripheral("chat");
        advertise(&mut chat);

        central.start_scan(None).unwrap();
        air.advertise_tick();

        let handles: Vec<PeerHandle> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|event| match event {
                CentralEvent::Discovered { handle, .. } => Some(handle),
                _ => None,
            })
            .collect();
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0], handles[1]);
    }

    #[test]
    fn test_powered_off_central_rejects_requests() {
        let air = VirtualAir::new();
        let (mut central, _rx) = air.central("c");
        air.set_power(&PeerId::new("c"), RadioState::PoweredOff);

        assert_eq!(central.start_scan(None), Err(RadioError::NotReady));
        assert_eq!(central.state(), RadioState::PoweredOff);
    }

    #[test]
    fn test_buffer_full_then_ready() {
        let air = VirtualAir::new();
        let (mut chat, mut rx) = air.peripheral("chat");
        advertise(&mut chat);
        while rx.try_recv().is_ok() {}

        air.set_buffer_full(&PeerId::new("chat"), true);
        assert_eq!(
            chat.update_value(OUTBOUND_CHANNEL_UUID, b"x", &[]),
            UpdateOutcome::BufferFull
        );
        air.set_buffer_full(&PeerId::new("chat"), false);
        assert_eq!(rx.try_recv().unwrap(), PeripheralEvent::ReadyToUpdate);
    }
}
