//! Async drivers for the role engines
//!
//! Each service is a single tokio task that owns its engine and multiplexes
//! three sources: commands from handles, hardware callbacks from the radio's
//! delivery queue and, for the initiator, the scan scheduler's next deadline.
//! Engine state is only ever touched from that task; consumers talk to it
//! through cloneable handles and observe it through the broadcast events.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::MacchatConfig;
use crate::errors::{ConfigError, MacchatError, ResponderError, Result, SessionError};
use crate::events::{EventPublisher, InitiatorEvent, ResponderEvent};
use crate::initiator::InitiatorEngine;
use crate::radio::{CentralEventReceiver, CentralRadio, PeripheralEventReceiver, PeripheralRadio};
use crate::responder::ResponderEngine;
use crate::types::{MessageRecord, PeerDescriptor, PeerId, SessionState, SubscriberRef};

type Reply<T> = oneshot::Sender<T>;

/// Sleep until `deadline`, or forever when nothing is scheduled
async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn request<C, T>(commands: &mpsc::Sender<C>, build: impl FnOnce(Reply<T>) -> C) -> Result<T> {
    let (reply, response) = oneshot::channel();
    commands
        .send(build(reply))
        .await
        .map_err(|_| MacchatError::EngineStopped)?;
    response.await.map_err(|_| MacchatError::EngineStopped)
}

// ----------------------------------------------------------------------------
// Initiator
// ----------------------------------------------------------------------------

#[derive(Debug)]
enum InitiatorCommand {
    StartScanning(Reply<()>),
    StopScanning(Reply<()>),
    SetScanInterval(Duration, Reply<std::result::Result<(), ConfigError>>),
    SelectPeer(PeerId, Reply<std::result::Result<(), SessionError>>),
    Disconnect(Reply<bool>),
    Send(PeerId, String, Reply<std::result::Result<(), SessionError>>),
    Messages(PeerId, Reply<Vec<String>>),
    History(PeerId, Reply<Vec<MessageRecord>>),
    Devices(Reply<Vec<PeerDescriptor>>),
    SessionState(Reply<(Option<PeerId>, SessionState)>),
    Shutdown,
}

/// Task driving an [`InitiatorEngine`]
pub struct InitiatorService<R> {
    engine: InitiatorEngine<R>,
    commands: mpsc::Receiver<InitiatorCommand>,
    radio_events: CentralEventReceiver,
}

impl<R: CentralRadio + 'static> InitiatorService<R> {
    pub fn new(
        radio: R,
        radio_events: CentralEventReceiver,
        config: &MacchatConfig,
    ) -> (Self, InitiatorHandle) {
        let events = EventPublisher::new(config.engine.event_buffer);
        let (command_tx, command_rx) = mpsc::channel(config.engine.command_buffer.max(1));
        let handle = InitiatorHandle {
            commands: command_tx,
            events: events.sender(),
        };
        let service = Self {
            engine: InitiatorEngine::new(radio, config, events),
            commands: command_rx,
            radio_events,
        };
        (service, handle)
    }

    /// Build the service and run it on the current runtime
    pub fn spawn(
        radio: R,
        radio_events: CentralEventReceiver,
        config: &MacchatConfig,
    ) -> (InitiatorHandle, JoinHandle<()>) {
        let (service, handle) = Self::new(radio, radio_events, config);
        let task = tokio::spawn(service.run());
        (handle, task)
    }

    pub async fn run(mut self) {
        info!("Initiator service started");
        let mut radio_open = true;

        loop {
            let deadline = self.engine.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(InitiatorCommand::Shutdown) | None => break,
                    Some(command) => self.process(command),
                },
                event = self.radio_events.recv(), if radio_open => match event {
                    Some(event) => self.engine.handle_event(event, Instant::now()),
                    None => {
                        warn!("Central radio event queue closed");
                        radio_open = false;
                    }
                },
                _ = sleep_until_deadline(deadline) => self.engine.poll(Instant::now()),
            }
        }

        self.engine.stop_scanning();
        self.engine.disconnect();
        info!("Initiator service stopped");
    }

    fn process(&mut self, command: InitiatorCommand) {
        debug!(?command, "Initiator command");
        // A dropped reply receiver means the caller stopped waiting
        match command {
            InitiatorCommand::StartScanning(reply) => {
                self.engine.start_scanning(Instant::now());
                let _ = reply.send(());
            }
            InitiatorCommand::StopScanning(reply) => {
                self.engine.stop_scanning();
                let _ = reply.send(());
            }
            InitiatorCommand::SetScanInterval(interval, reply) => {
                let _ = reply.send(self.engine.set_scan_interval(interval, Instant::now()));
            }
            InitiatorCommand::SelectPeer(peer_id, reply) => {
                let _ = reply.send(self.engine.select_peer(&peer_id));
            }
            InitiatorCommand::Disconnect(reply) => {
                let _ = reply.send(self.engine.disconnect());
            }
            InitiatorCommand::Send(peer_id, text, reply) => {
                let _ = reply.send(self.engine.send(&peer_id, &text));
            }
            InitiatorCommand::Messages(peer_id, reply) => {
                let _ = reply.send(self.engine.messages(&peer_id));
            }
            InitiatorCommand::History(peer_id, reply) => {
                let _ = reply.send(self.engine.history(&peer_id));
            }
            InitiatorCommand::Devices(reply) => {
                let _ = reply.send(self.engine.devices());
            }
            InitiatorCommand::SessionState(reply) => {
                let peer = self.engine.session().map(|s| s.peer_id().clone());
                let _ = reply.send((peer, self.engine.session_state()));
            }
            InitiatorCommand::Shutdown => {}
        }
    }
}

/// Cloneable handle to a running [`InitiatorService`]
#[derive(Debug, Clone)]
pub struct InitiatorHandle {
    commands: mpsc::Sender<InitiatorCommand>,
    events: broadcast::Sender<InitiatorEvent>,
}

impl InitiatorHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<InitiatorEvent> {
        self.events.subscribe()
    }

    pub async fn start_scanning(&self) -> Result<()> {
        request(&self.commands, InitiatorCommand::StartScanning).await
    }

    pub async fn stop_scanning(&self) -> Result<()> {
        request(&self.commands, InitiatorCommand::StopScanning).await
    }

    pub async fn set_scan_interval(&self, interval: Duration) -> Result<()> {
        Ok(request(&self.commands, |reply| InitiatorCommand::SetScanInterval(interval, reply)).await??)
    }

    pub async fn select_peer(&self, peer_id: PeerId) -> Result<()> {
        Ok(request(&self.commands, |reply| InitiatorCommand::SelectPeer(peer_id, reply)).await??)
    }

    /// Returns false if there was no session to tear down
    pub async fn disconnect(&self) -> Result<bool> {
        request(&self.commands, InitiatorCommand::Disconnect).await
    }

    pub async fn send(&self, peer_id: PeerId, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        Ok(request(&self.commands, |reply| InitiatorCommand::Send(peer_id, text, reply)).await??)
    }

    pub async fn messages(&self, peer_id: PeerId) -> Result<Vec<String>> {
        request(&self.commands, |reply| InitiatorCommand::Messages(peer_id, reply)).await
    }

    pub async fn history(&self, peer_id: PeerId) -> Result<Vec<MessageRecord>> {
        request(&self.commands, |reply| InitiatorCommand::History(peer_id, reply)).await
    }

    /// Device list as of the last closed scan window
    pub async fn devices(&self) -> Result<Vec<PeerDescriptor>> {
        request(&self.commands, InitiatorCommand::Devices).await
    }

    pub async fn session_state(&self) -> Result<(Option<PeerId>, SessionState)> {
        request(&self.commands, InitiatorCommand::SessionState).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.commands
            .send(InitiatorCommand::Shutdown)
            .await
            .map_err(|_| MacchatError::EngineStopped)
    }
}

// ----------------------------------------------------------------------------
// Responder
// ----------------------------------------------------------------------------

/// Point-in-time view of the responder engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponderStatus {
    pub ready: bool,
    pub advertising: bool,
    pub subscribers: Vec<SubscriberRef>,
}

#[derive(Debug)]
enum ResponderCommand {
    Notify(String, Reply<std::result::Result<(), ResponderError>>),
    StartAdvertising(Reply<std::result::Result<(), ResponderError>>),
    StopAdvertising(Reply<std::result::Result<(), ResponderError>>),
    Messages(PeerId, Reply<Vec<String>>),
    History(PeerId, Reply<Vec<MessageRecord>>),
    Status(Reply<ResponderStatus>),
    Shutdown,
}

/// Task driving a [`ResponderEngine`]
pub struct ResponderService<R> {
    engine: ResponderEngine<R>,
    commands: mpsc::Receiver<ResponderCommand>,
    radio_events: PeripheralEventReceiver,
}

impl<R: PeripheralRadio + 'static> ResponderService<R> {
    pub fn new(
        radio: R,
        radio_events: PeripheralEventReceiver,
        config: &MacchatConfig,
    ) -> (Self, ResponderHandle) {
        let events = EventPublisher::new(config.engine.event_buffer);
        let (command_tx, command_rx) = mpsc::channel(config.engine.command_buffer.max(1));
        let handle = ResponderHandle {
            commands: command_tx,
            events: events.sender(),
        };
        let service = Self {
            engine: ResponderEngine::new(radio, config.responder.clone(), events),
            commands: command_rx,
            radio_events,
        };
        (service, handle)
    }

    pub fn spawn(
        radio: R,
        radio_events: PeripheralEventReceiver,
        config: &MacchatConfig,
    ) -> (ResponderHandle, JoinHandle<()>) {
        let (service, handle) = Self::new(radio, radio_events, config);
        let task = tokio::spawn(service.run());
        (handle, task)
    }

    pub async fn run(mut self) {
        info!("Responder service started");
        self.engine.start();
        let mut radio_open = true;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ResponderCommand::Shutdown) | None => break,
                    Some(command) => self.process(command),
                },
                event = self.radio_events.recv(), if radio_open => match event {
                    Some(event) => self.engine.handle_event(event),
                    None => {
                        warn!("Peripheral radio event queue closed");
                        radio_open = false;
                    }
                },
            }
        }

        if let Err(e) = self.engine.stop_advertising() {
            warn!("Failed to stop advertising on shutdown: {}", e);
        }
        info!("Responder service stopped");
    }

    fn process(&mut self, command: ResponderCommand) {
        debug!(?command, "Responder command");
        match command {
            ResponderCommand::Notify(text, reply) => {
                let _ = reply.send(self.engine.notify(&text));
            }
            ResponderCommand::StartAdvertising(reply) => {
                let _ = reply.send(self.engine.start_advertising());
            }
            ResponderCommand::StopAdvertising(reply) => {
                let _ = reply.send(self.engine.stop_advertising());
            }
            ResponderCommand::Messages(peer_id, reply) => {
                let _ = reply.send(self.engine.messages(&peer_id));
            }
            ResponderCommand::History(peer_id, reply) => {
                let _ = reply.send(self.engine.history(&peer_id));
            }
            ResponderCommand::Status(reply) => {
                let _ = reply.send(ResponderStatus {
                    ready: self.engine.is_ready(),
                    advertising: self.engine.is_advertising(),
                    subscribers: self.engine.subscribers().to_vec(),
                });
            }
            ResponderCommand::Shutdown => {}
        }
    }
}

/// Cloneable handle to a running [`ResponderService`]
#[derive(Debug, Clone)]
pub struct ResponderHandle {
    commands: mpsc::Sender<ResponderCommand>,
    events: broadcast::Sender<ResponderEvent>,
}

impl ResponderHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<ResponderEvent> {
        self.events.subscribe()
    }

    /// Push `text` to all subscribers; a full buffer is reported, never retried
    pub async fn notify(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        Ok(request(&self.commands, |reply| ResponderCommand::Notify(text, reply)).await??)
    }

    pub async fn start_advertising(&self) -> Result<()> {
        Ok(request(&self.commands, ResponderCommand::StartAdvertising).await??)
    }

    pub async fn stop_advertising(&self) -> Result<()> {
        Ok(request(&self.commands, ResponderCommand::StopAdvertising).await??)
    }

    pub async fn messages(&self, peer_id: PeerId) -> Result<Vec<String>> {
        request(&self.commands, |reply| ResponderCommand::Messages(peer_id, reply)).await
    }

    pub async fn history(&self, peer_id: PeerId) -> Result<Vec<MessageRecord>> {
        request(&self.commands, |reply| ResponderCommand::History(peer_id, reply)).await
    }

    pub async fn subscribers(&self) -> Result<Vec<SubscriberRef>> {
        Ok(self.status().await?.subscribers)
    }

    pub async fn status(&self) -> Result<ResponderStatus> {
        request(&self.commands, ResponderCommand::Status).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.commands
            .send(ResponderCommand::Shutdown)
            .await
            .map_err(|_| MacchatError::EngineStopped)
    }
}
