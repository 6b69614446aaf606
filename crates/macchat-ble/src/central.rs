//! Initiator radio backed by btleplug
//!
//! btleplug is async while [`CentralRadio`] is a synchronous request issuer,
//! so every request is spawned onto the runtime that created the adapter and
//! its completion is reported back on the event queue. Scan start and stop go
//! through one worker so the adapter sees them in the order they were issued.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use btleplug::api::{
    Central, CentralEvent as AdapterEvent, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, ScanFilter, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{Stream, StreamExt};
use macchat_core::protocol::{AttributeDefinition, AttributeProperties};
use macchat_core::{
    AttributeRef, CentralEvent, CentralEventReceiver, CentralEventSender, CentralRadio,
    PeerHandle, PeerId, RadioError, RadioState, ServiceDefinition,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BleConfig;
use crate::error::BleError;

/// Reported when the platform gives no signal strength for a sighting
pub const RSSI_UNAVAILABLE: i16 = 127;

type AdapterEvents = Pin<Box<dyn Stream<Item = AdapterEvent> + Send>>;

// ----------------------------------------------------------------------------
// Peer Table
// ----------------------------------------------------------------------------

struct KnownPeer {
    peer_id: PeerId,
    peripheral: Peripheral,
    notifications: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct PeerTable {
    peers: HashMap<PeerHandle, KnownPeer>,
    handles: HashMap<PeripheralId, PeerHandle>,
    next_handle: u64,
    /// Active scan filter; `None` while not scanning
    scan: Option<Option<Uuid>>,
}

impl PeerTable {
    /// Mint a stable handle for a platform peripheral
    fn register(&mut self, id: &PeripheralId, peripheral: Peripheral) -> (PeerHandle, PeerId) {
        if let Some(handle) = self.handles.get(id) {
            if let Some(known) = self.peers.get(handle) {
                return (*handle, known.peer_id.clone());
            }
        }

        self.next_handle += 1;
        let handle = PeerHandle::new(self.next_handle);
        let peer_id = peer_id_of(id);
        self.handles.insert(id.clone(), handle);
        self.peers.insert(
            handle,
            KnownPeer {
                peer_id: peer_id.clone(),
                peripheral,
                notifications: None,
            },
        );
        (handle, peer_id)
    }

    fn stop_notifications(&mut self, handle: PeerHandle) {
        if let Some(task) = self
            .peers
            .get_mut(&handle)
            .and_then(|known| known.notifications.take())
        {
            task.abort();
        }
    }
}

fn lock(table: &Mutex<PeerTable>) -> MutexGuard<'_, PeerTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

fn peer_id_of(id: &PeripheralId) -> PeerId {
    PeerId::new(format!("{:?}", id))
}

// ----------------------------------------------------------------------------
// Central Adapter
// ----------------------------------------------------------------------------

/// Adapter scan change, applied in issue order
#[derive(Debug, Clone)]
enum ScanRequest {
    Start(ScanFilter),
    Stop,
}

/// Apply scan requests one at a time until the sender goes away
async fn run_scan_requests<F, Fut>(
    mut requests: mpsc::UnboundedReceiver<ScanRequest>,
    mut apply: F,
) where
    F: FnMut(ScanRequest) -> Fut,
    Fut: Future<Output = Result<(), BleError>>,
{
    while let Some(request) = requests.recv().await {
        let operation = match request {
            ScanRequest::Start(_) => "start scan",
            ScanRequest::Stop => "stop scan",
        };
        if let Err(e) = apply(request).await {
            warn!("{} failed: {}", operation, e);
        }
    }
}

/// [`CentralRadio`] over the host's default BLE stack
pub struct BtleplugCentral {
    adapter: Adapter,
    config: BleConfig,
    runtime: Handle,
    events: CentralEventSender,
    table: Arc<Mutex<PeerTable>>,
    state: RadioState,
    pump: JoinHandle<()>,
    scan_requests: mpsc::UnboundedSender<ScanRequest>,
    scan_worker: JoinHandle<()>,
}

impl BtleplugCentral {
    /// Open the configured adapter and start forwarding its events.
    ///
    /// Must be called from within a tokio runtime; requests are spawned onto it.
    pub async fn new(config: &BleConfig) -> Result<(Self, CentralEventReceiver), BleError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .nth(config.adapter_index)
            .ok_or(BleError::AdapterNotAvailable)?;

        let (events, receiver) = mpsc::unbounded_channel();
        let table = Arc::new(Mutex::new(PeerTable::default()));
        let stream = adapter.events().await?;
        let pump = tokio::spawn(pump_adapter_events(
            adapter.clone(),
            stream,
            table.clone(),
            events.clone(),
        ));

        let (scan_requests, pending_scans) = mpsc::unbounded_channel();
        let scanner = adapter.clone();
        let scan_worker = tokio::spawn(run_scan_requests(pending_scans, move |request| {
            let scanner = scanner.clone();
            async move {
                match request {
                    ScanRequest::Start(filter) => scanner.start_scan(filter).await?,
                    ScanRequest::Stop => scanner.stop_scan().await?,
                }
                Ok::<(), BleError>(())
            }
        }));

        info!(adapter_index = config.adapter_index, "BLE central adapter initialized");
        let _ = events.send(CentralEvent::StateChanged(RadioState::PoweredOn));

        Ok((
            Self {
                adapter,
                config: config.clone(),
                runtime: Handle::current(),
                events,
                table,
                state: RadioState::PoweredOn,
                pump,
                scan_requests,
                scan_worker,
            },
            receiver,
        ))
    }

    fn lookup(&self, handle: PeerHandle) -> Result<(PeerId, Peripheral), RadioError> {
        lock(&self.table)
            .peers
            .get(&handle)
            .map(|known| (known.peer_id.clone(), known.peripheral.clone()))
            .ok_or_else(|| BleError::UnknownPeer { handle: handle.raw() }.into())
    }

    fn request_scan(&self, request: ScanRequest) -> Result<(), RadioError> {
        self.scan_requests
            .send(request)
            .map_err(|_| RadioError::Backend("scan worker stopped".to_string()))
    }

    /// Run a request whose only completion signal is the log
    fn spawn_request<F>(&self, operation: &'static str, request: F)
    where
        F: Future<Output = Result<(), BleError>> + Send + 'static,
    {
        self.runtime.spawn(async move {
            if let Err(e) = request.await {
                warn!("{} failed: {}", operation, e);
            }
        });
    }
}

impl Drop for BtleplugCentral {
    fn drop(&mut self) {
        self.pump.abort();
        self.scan_worker.abort();
        for known in lock(&self.table).peers.values_mut() {
            if let Some(task) = known.notifications.take() {
                task.abort();
            }
        }
    }
}

impl CentralRadio for BtleplugCentral {
    fn state(&self) -> RadioState {
        self.state
    }

    fn start_scan(&mut self, service: Option<Uuid>) -> Result<(), RadioError> {
        lock(&self.table).scan = Some(service);
        let filter = ScanFilter {
            services: service.into_iter().collect(),
        };
        self.request_scan(ScanRequest::Start(filter))
    }

    fn stop_scan(&mut self) -> Result<(), RadioError> {
        lock(&self.table).scan = None;
        self.request_scan(ScanRequest::Stop)
    }

    fn connect(&mut self, peer: PeerHandle) -> Result<(), RadioError> {
        let (peer_id, peripheral) = self.lookup(peer)?;
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let event = match peripheral.connect().await {
                Ok(()) => CentralEvent::Connected { peer_id },
                Err(e) => CentralEvent::ConnectFailed {
                    peer_id,
                    reason: e.to_string(),
                },
            };
            let _ = events.send(event);
        });
        Ok(())
    }

    fn cancel_connection(&mut self, peer: PeerHandle) -> Result<(), RadioError> {
        let (peer_id, peripheral) = self.lookup(peer)?;
        lock(&self.table).stop_notifications(peer);
        debug!("Cancelling connection to {}", peer_id);
        self.spawn_request("disconnect", async move {
            peripheral.disconnect().await.map_err(BleError::from)
        });
        Ok(())
    }

    fn discover_attributes(&mut self, peer: PeerHandle, service: Uuid) -> Result<(), RadioError> {
        let (peer_id, peripheral) = self.lookup(peer)?;
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let result = match peripheral.discover_services().await {
                Ok(()) => Ok(peripheral
                    .services()
                    .iter()
                    .filter(|s| s.uuid == service)
                    .map(service_definition)
                    .collect()),
                Err(e) => Err(e.to_string()),
            };
            let _ = events.send(CentralEvent::AttributesDiscovered { peer_id, result });
        });
        Ok(())
    }

    fn subscribe(&mut self, peer: PeerHandle, attribute: AttributeRef) -> Result<(), RadioError> {
        let (peer_id, peripheral) = self.lookup(peer)?;
        let events = self.events.clone();
        let table = self.table.clone();
        self.runtime.spawn(async move {
            let result = match forward_notifications(&peripheral, attribute, &peer_id, &events).await
            {
                Ok(task) => {
                    let mut table = lock(&table);
                    table.stop_notifications(peer);
                    match table.peers.get_mut(&peer) {
                        Some(known) => known.notifications = Some(task),
                        None => task.abort(),
                    }
                    Ok(true)
                }
                Err(e) => Err(e.to_string()),
            };
            let _ = events.send(CentralEvent::SubscriptionChanged {
                peer_id,
                attribute,
                result,
            });
        });
        Ok(())
    }

    fn write(
        &mut self,
        peer: PeerHandle,
        attribute: AttributeRef,
        value: &[u8],
    ) -> Result<(), RadioError> {
        let (peer_id, peripheral) = self.lookup(peer)?;
        let events = self.events.clone();
        let value = value.to_vec();
        let write_type = if self.config.write_with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        self.runtime.spawn(async move {
            let error = match find_characteristic(&peripheral, attribute) {
                Ok(characteristic) => peripheral
                    .write(&characteristic, &value, write_type)
                    .await
                    .err()
                    .map(|e| e.to_string()),
                Err(e) => Some(e.to_string()),
            };
            let _ = events.send(CentralEvent::WriteCompleted {
                peer_id,
                attribute,
                error,
            });
        });
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Background Tasks
// ----------------------------------------------------------------------------

async fn pump_adapter_events(
    adapter: Adapter,
    mut stream: AdapterEvents,
    table: Arc<Mutex<PeerTable>>,
    events: CentralEventSender,
) {
    while let Some(event) = stream.next().await {
        match event {
            AdapterEvent::DeviceDiscovered(id) | AdapterEvent::DeviceUpdated(id) => {
                if let Err(e) = report_sighting(&adapter, &id, &table, &events).await {
                    debug!("Ignoring sighting of {:?}: {}", id, e);
                }
            }
            AdapterEvent::DeviceDisconnected(id) => {
                let peer_id = {
                    let mut table = lock(&table);
                    let handle = table.handles.get(&id).copied();
                    handle.and_then(|handle| {
                        table.stop_notifications(handle);
                        table.peers.get(&handle).map(|known| known.peer_id.clone())
                    })
                };
                if let Some(peer_id) = peer_id {
                    let _ = events.send(CentralEvent::Disconnected {
                        peer_id,
                        error: None,
                    });
                }
            }
            _ => {}
        }
    }
    debug!("Adapter event stream ended");
}

async fn report_sighting(
    adapter: &Adapter,
    id: &PeripheralId,
    table: &Mutex<PeerTable>,
    events: &CentralEventSender,
) -> Result<(), BleError> {
    let filter = lock(table).scan;
    let Some(filter) = filter else {
        return Ok(());
    };

    let peripheral = adapter.peripheral(id).await?;
    let Some(properties) = peripheral.properties().await? else {
        return Ok(());
    };
    if !advertises(&properties.services, filter) {
        return Ok(());
    }

    let (handle, peer_id) = lock(table).register(id, peripheral);
    let _ = events.send(CentralEvent::Discovered {
        peer_id,
        name: properties.local_name,
        rssi: properties.rssi.unwrap_or(RSSI_UNAVAILABLE),
        handle,
    });
    Ok(())
}

/// Subscribe to `attribute` and forward its notifications until aborted
async fn forward_notifications(
    peripheral: &Peripheral,
    attribute: AttributeRef,
    peer_id: &PeerId,
    events: &CentralEventSender,
) -> Result<JoinHandle<()>, BleError> {
    let characteristic = find_characteristic(peripheral, attribute)?;
    let mut notifications = peripheral.notifications().await?;
    peripheral.subscribe(&characteristic).await?;

    let peer_id = peer_id.clone();
    let events = events.clone();
    Ok(tokio::spawn(async move {
        while let Some(notification) = notifications.next().await {
            if notification.uuid != attribute.attribute {
                continue;
            }
            let event = CentralEvent::Notification {
                peer_id: peer_id.clone(),
                attribute,
                value: notification.value,
            };
            if events.send(event).is_err() {
                break;
            }
        }
    }))
}

// ----------------------------------------------------------------------------
// Attribute Mapping
// ----------------------------------------------------------------------------

fn find_characteristic(
    peripheral: &Peripheral,
    attribute: AttributeRef,
) -> Result<Characteristic, BleError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == attribute.attribute && c.service_uuid == attribute.service)
        .ok_or(BleError::AttributeNotFound {
            uuid: attribute.attribute,
        })
}

fn advertises(services: &[Uuid], filter: Option<Uuid>) -> bool {
    filter.map_or(true, |service| services.contains(&service))
}

fn properties_from_flags(flags: CharPropFlags) -> AttributeProperties {
    AttributeProperties {
        read: flags.contains(CharPropFlags::READ),
        write: flags.contains(CharPropFlags::WRITE),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: flags.contains(CharPropFlags::NOTIFY),
        indicate: flags.contains(CharPropFlags::INDICATE),
    }
}

fn service_definition(service: &Service) -> ServiceDefinition {
    ServiceDefinition {
        uuid: service.uuid,
        attributes: service
            .characteristics
            .iter()
            .map(|c| AttributeDefinition {
                uuid: c.uuid,
                properties: properties_from_flags(c.properties),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use macchat_core::protocol::match_channels;
    use macchat_core::{INBOUND_CHANNEL_UUID, OUTBOUND_CHANNEL_UUID, SERVICE_UUID};

    use super::*;

    fn characteristic(uuid: Uuid, properties: CharPropFlags) -> Characteristic {
        Characteristic {
            uuid,
            service_uuid: SERVICE_UUID,
            properties,
            descriptors: BTreeSet::new(),
        }
    }

    #[test]
    fn test_flags_map_to_properties() {
        let properties = properties_from_flags(CharPropFlags::WRITE | CharPropFlags::INDICATE);
        assert!(properties.can_write());
        assert!(properties.can_notify());
        assert!(!properties.read);
        assert!(!properties.write_without_response);
    }

    #[test]
    fn test_discovered_service_matches_channels() {
        let service = Service {
            uuid: SERVICE_UUID,
            primary: true,
            characteristics: [
                characteristic(OUTBOUND_CHANNEL_UUID, CharPropFlags::NOTIFY),
                characteristic(
                    INBOUND_CHANNEL_UUID,
                    CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE,
                ),
            ]
            .into_iter()
            .collect(),
        };

        let definition = service_definition(&service);
        assert_eq!(definition.attributes.len(), 2);
        let channels = match_channels(&[definition]).unwrap();
        assert_eq!(
            channels.inbound,
            AttributeRef::new(SERVICE_UUID, INBOUND_CHANNEL_UUID)
        );
    }

    #[test]
    fn test_scan_filter() {
        assert!(advertises(&[], None));
        assert!(advertises(&[SERVICE_UUID], Some(SERVICE_UUID)));
        assert!(!advertises(&[OUTBOUND_CHANNEL_UUID], Some(SERVICE_UUID)));
    }

    #[tokio::test]
    async fn test_scan_requests_apply_in_issue_order() {
        let (requests, pending) = mpsc::unbounded_channel();
        requests
            .send(ScanRequest::Start(ScanFilter::default()))
            .unwrap();
        requests.send(ScanRequest::Stop).unwrap();
        requests.send(ScanRequest::Stop).unwrap();
        requests
            .send(ScanRequest::Start(ScanFilter::default()))
            .unwrap();
        drop(requests);

        let applied = Arc::new(Mutex::new(Vec::new()));
        let seen = applied.clone();
        let mut stops = 0;
        run_scan_requests(pending, move |request| {
            let seen = seen.clone();
            let fail = matches!(request, ScanRequest::Stop) && {
                stops += 1;
                stops == 1
            };
            async move {
                // Starting is slower than stopping
                if matches!(request, ScanRequest::Start(_)) {
                    for _ in 0..5 {
                        tokio::task::yield_now().await;
                    }
                }
                seen.lock().unwrap().push(match request {
                    ScanRequest::Start(_) => "start",
                    ScanRequest::Stop => "stop",
                });
                if fail {
                    Err(BleError::AdapterNotAvailable)
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert_eq!(*applied.lock().unwrap(), vec!["start", "stop", "stop", "start"]);
    }
}
