//! Responder radio backed by BlueZ
//!
//! The GATT application is served through `bluer`. Writes are parked on a
//! oneshot until the engine answers them. Notify sessions arrive on the
//! characteristic's control stream, carrying the subscriber's device address,
//! and each gets a bounded queue whose exhaustion is reported as
//! [`UpdateOutcome::BufferFull`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bluer::adv::{Advertisement as BluezAdvertisement, AdvertisementHandle};
use bluer::gatt::local::{
    characteristic_control, Application, ApplicationHandle, Characteristic,
    CharacteristicControl, CharacteristicControlEvent, CharacteristicControlHandle,
    CharacteristicNotify,
    CharacteristicNotifyMethod, CharacteristicWrite, CharacteristicWriteMethod,
    CharacteristicWriteRequest, ReqError, Service,
};
use bluer::gatt::CharacteristicWriter;
use bluer::{Adapter, AdapterEvent, AdapterProperty, Session};
use futures::{Stream, StreamExt};
use macchat_core::protocol::AttributeDefinition;
use macchat_core::{
    Advertisement, PeerId, PeripheralEvent, PeripheralEventReceiver, PeripheralEventSender,
    PeripheralRadio, RadioError, RadioState, RequestId, ServiceDefinition, SubscriberRef,
    UpdateOutcome, WriteRequest, WriteStatus,
};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BleConfig;
use crate::error::BleError;

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

struct SubscriberQueue {
    session: u64,
    attribute: Uuid,
    queue: mpsc::Sender<Vec<u8>>,
}

/// State touched by both the engine thread and BlueZ callbacks
struct Shared {
    state: RadioState,
    application: Option<ApplicationHandle>,
    advertisement: Option<AdvertisementHandle>,
    pending: HashMap<RequestId, oneshot::Sender<WriteStatus>>,
    next_request: u64,
    subscribers: HashMap<SubscriberRef, SubscriberQueue>,
    next_session: u64,
    /// Control stream readers, one per notifying characteristic
    notify_sessions: Vec<JoinHandle<()>>,
    /// Set when an update was refused; cleared by the next delivered notification
    awaiting_ready: bool,
}

impl Shared {
    fn new(state: RadioState) -> Self {
        Self {
            state,
            application: None,
            advertisement: None,
            pending: HashMap::new(),
            next_request: 0,
            subscribers: HashMap::new(),
            next_session: 0,
            notify_sessions: Vec::new(),
            awaiting_ready: false,
        }
    }

    /// Drop everything BlueZ tears down with the adapter
    fn power_down(&mut self) {
        self.application = None;
        self.advertisement = None;
        self.pending.clear();
        self.subscribers.clear();
        for task in self.notify_sessions.drain(..) {
            task.abort();
        }
        self.awaiting_ready = false;
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn radio_state(powered: bool) -> RadioState {
    if powered {
        RadioState::PoweredOn
    } else {
        RadioState::PoweredOff
    }
}

// ----------------------------------------------------------------------------
// BlueZ Peripheral
// ----------------------------------------------------------------------------

/// [`PeripheralRadio`] serving the chat service through BlueZ
pub struct BluezPeripheral {
    _session: Session,
    adapter: Adapter,
    config: BleConfig,
    runtime: Handle,
    events: PeripheralEventSender,
    shared: Arc<Mutex<Shared>>,
    power_pump: JoinHandle<()>,
}

impl BluezPeripheral {
    /// Open the configured BlueZ adapter and watch its power state
    pub async fn new(config: &BleConfig) -> Result<(Self, PeripheralEventReceiver), BleError> {
        let session = Session::new().await?;
        let names = session.adapter_names().await?;
        let name = names
            .get(config.adapter_index)
            .ok_or(BleError::AdapterNotAvailable)?;
        let adapter = session.adapter(name)?;

        let state = radio_state(adapter.is_powered().await?);
        info!("Using BlueZ adapter {} ({})", adapter.name(), state);

        let (events, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared::new(state)));
        let power_pump = tokio::spawn(pump_power_events(
            adapter.events().await?,
            shared.clone(),
            events.clone(),
        ));

        Ok((
            Self {
                _session: session,
                adapter,
                config: config.clone(),
                runtime: Handle::current(),
                events,
                shared,
                power_pump,
            },
            receiver,
        ))
    }

    fn ensure_ready(&self) -> Result<(), RadioError> {
        if lock(&self.shared).state.is_ready() {
            Ok(())
        } else {
            Err(RadioError::NotReady)
        }
    }

    fn application(&self, definition: &ServiceDefinition) -> Application {
        let characteristics = definition
            .attributes
            .iter()
            .map(|attribute| self.characteristic(attribute))
            .collect();
        Application {
            services: vec![Service {
                uuid: definition.uuid,
                primary: true,
                characteristics,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn characteristic(&self, attribute: &AttributeDefinition) -> Characteristic {
        let uuid = attribute.uuid;
        let properties = attribute.properties;

        let write = properties.can_write().then(|| {
            let shared = self.shared.clone();
            let events = self.events.clone();
            CharacteristicWrite {
                write: properties.write,
                write_without_response: properties.write_without_response,
                method: CharacteristicWriteMethod::Fun(Box::new(
                    move |value: Vec<u8>, request: CharacteristicWriteRequest| {
                        let shared = shared.clone();
                        let events = events.clone();
                        Box::pin(async move {
                            let from = PeerId::new(request.device_address.to_string());
                            await_write_response(&shared, &events, from, uuid, value).await
                        })
                    },
                )),
                ..Default::default()
            }
        });

        let mut control_handle = CharacteristicControlHandle::default();
        let notify = properties.can_notify().then(|| {
            let (control, handle) = characteristic_control();
            control_handle = handle;
            let task = self.runtime.spawn(accept_notify_sessions(
                control,
                self.shared.clone(),
                self.events.clone(),
                uuid,
                self.config.notify_queue_depth,
            ));
            lock(&self.shared).notify_sessions.push(task);
            CharacteristicNotify {
                notify: properties.notify,
                indicate: properties.indicate,
                method: CharacteristicNotifyMethod::Io,
                ..Default::default()
            }
        });

        Characteristic {
            uuid,
            write,
            notify,
            control_handle,
            ..Default::default()
        }
    }
}

impl Drop for BluezPeripheral {
    fn drop(&mut self) {
        self.power_pump.abort();
        lock(&self.shared).power_down();
    }
}

impl PeripheralRadio for BluezPeripheral {
    fn state(&self) -> RadioState {
        lock(&self.shared).state
    }

    fn register_service(&mut self, service: &ServiceDefinition) -> Result<(), RadioError> {
        self.ensure_ready()?;
        let application = self.application(service);
        let adapter = self.adapter.clone();
        let shared = self.shared.clone();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let error = match adapter.serve_gatt_application(application).await {
                Ok(handle) => {
                    lock(&shared).application = Some(handle);
                    None
                }
                Err(e) => Some(e.to_string()),
            };
            let _ = events.send(PeripheralEvent::ServiceRegistered { error });
        });
        Ok(())
    }

    fn start_advertising(&mut self, advertisement: &Advertisement) -> Result<(), RadioError> {
        self.ensure_ready()?;
        let payload = BluezAdvertisement {
            service_uuids: [advertisement.service].into_iter().collect(),
            discoverable: Some(true),
            local_name: Some(advertisement.local_name.clone()),
            ..Default::default()
        };
        let adapter = self.adapter.clone();
        let shared = self.shared.clone();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let error = match adapter.advertise(payload).await {
                Ok(handle) => {
                    lock(&shared).advertisement = Some(handle);
                    None
                }
                Err(e) => Some(e.to_string()),
            };
            let _ = events.send(PeripheralEvent::AdvertisingStarted { error });
        });
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<(), RadioError> {
        // Dropping the handle unregisters the advertisement
        if lock(&self.shared).advertisement.take().is_some() {
            debug!("Advertisement withdrawn");
        }
        Ok(())
    }

    fn update_value(
        &mut self,
        attribute: Uuid,
        value: &[u8],
        subscribers: &[SubscriberRef],
    ) -> UpdateOutcome {
        let mut shared = lock(&self.shared);
        if !shared.state.is_ready() {
            return UpdateOutcome::BufferFull;
        }

        let mut queues: Vec<mpsc::Sender<Vec<u8>>> = Vec::with_capacity(subscribers.len());
        for (index, subscriber) in subscribers.iter().enumerate() {
            // One queue per peer, however often it is listed
            if subscribers[..index].contains(subscriber) {
                continue;
            }
            if let Some(entry) = shared.subscribers.get(subscriber) {
                if entry.attribute == attribute {
                    queues.push(entry.queue.clone());
                }
            }
        }
        if queues.iter().any(|queue| queue.capacity() == 0) {
            shared.awaiting_ready = true;
            return UpdateOutcome::BufferFull;
        }

        for queue in queues {
            if queue.try_send(value.to_vec()).is_err() {
                debug!("Subscriber queue closed while notifying");
            }
        }
        UpdateOutcome::Sent
    }

    fn respond(&mut self, request: RequestId, status: WriteStatus) -> Result<(), RadioError> {
        let reply = lock(&self.shared)
            .pending
            .remove(&request)
            .ok_or(BleError::UnknownRequest { id: request.raw() })?;
        // The remote may have gone away while the engine decided
        let _ = reply.send(status);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// BlueZ Callbacks
// ----------------------------------------------------------------------------

async fn await_write_response(
    shared: &Mutex<Shared>,
    events: &PeripheralEventSender,
    from: PeerId,
    attribute: Uuid,
    value: Vec<u8>,
) -> Result<(), ReqError> {
    let (reply, response) = oneshot::channel();
    let id = {
        let mut shared = lock(shared);
        shared.next_request += 1;
        let id = RequestId::new(shared.next_request);
        shared.pending.insert(id, reply);
        id
    };

    let request = WriteRequest {
        id,
        from,
        attribute,
        value,
    };
    if events
        .send(PeripheralEvent::WriteRequests(vec![request]))
        .is_err()
    {
        lock(shared).pending.remove(&id);
        return Err(ReqError::Failed);
    }

    match response.await {
        Ok(WriteStatus::Success) => Ok(()),
        Ok(WriteStatus::RequestNotSupported) => Err(ReqError::NotSupported),
        Err(_) => Err(ReqError::Failed),
    }
}

async fn accept_notify_sessions(
    control: CharacteristicControl,
    shared: Arc<Mutex<Shared>>,
    events: PeripheralEventSender,
    attribute: Uuid,
    depth: usize,
) {
    let mut control = Box::pin(control);
    while let Some(event) = control.next().await {
        if let CharacteristicControlEvent::Notify(writer) = event {
            tokio::spawn(serve_subscriber(
                writer,
                shared.clone(),
                events.clone(),
                attribute,
                depth,
            ));
        }
    }
    debug!("Control stream for {} closed", attribute);
}

async fn serve_subscriber(
    writer: CharacteristicWriter,
    shared: Arc<Mutex<Shared>>,
    events: PeripheralEventSender,
    attribute: Uuid,
    depth: usize,
) {
    let (queue, mut pending) = mpsc::channel(depth);
    // Same identity as the `from` of this device's writes
    let subscriber = SubscriberRef::new(PeerId::new(writer.device_address().to_string()));
    let session = {
        let mut shared = lock(&shared);
        shared.next_session += 1;
        let session = shared.next_session;
        shared.subscribers.insert(
            subscriber.clone(),
            SubscriberQueue {
                session,
                attribute,
                queue,
            },
        );
        session
    };
    debug!("{} subscribed", subscriber.peer_id());
    let _ = events.send(PeripheralEvent::Subscribed {
        subscriber: subscriber.clone(),
        attribute,
    });

    loop {
        let value = tokio::select! {
            value = pending.recv() => value,
            _ = writer.closed() => None,
        };
        let Some(value) = value else { break };
        if let Err(e) = writer.send(&value).await {
            debug!("Notification to {} failed: {}", subscriber.peer_id(), e);
            break;
        }
        let drained = std::mem::take(&mut lock(&shared).awaiting_ready);
        if drained {
            let _ = events.send(PeripheralEvent::ReadyToUpdate);
        }
    }

    {
        // A newer session from the same device owns the entry now
        let mut shared = lock(&shared);
        if shared
            .subscribers
            .get(&subscriber)
            .is_some_and(|entry| entry.session == session)
        {
            shared.subscribers.remove(&subscriber);
        }
    }
    let _ = events.send(PeripheralEvent::Unsubscribed {
        subscriber,
        attribute,
    });
}

async fn pump_power_events<S>(stream: S, shared: Arc<Mutex<Shared>>, events: PeripheralEventSender)
where
    S: Stream<Item = AdapterEvent> + Send + 'static,
{
    let mut stream = Box::pin(stream);
    while let Some(event) = stream.next().await {
        if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
            let state = radio_state(powered);
            {
                let mut shared = lock(&shared);
                shared.state = state;
                if !powered {
                    shared.power_down();
                }
            }
            if !powered {
                warn!("Bluetooth adapter powered off");
            }
            let _ = events.send(PeripheralEvent::StateChanged(state));
        }
    }
}
