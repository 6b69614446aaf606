//! Command handlers for the MacChat CLI

use std::time::Duration;

use anyhow::{anyhow, Context};
use macchat_ble::{BtleplugCentral, PlatformPeripheral};
use macchat_core::sim::VirtualAir;
use macchat_core::{
    InitiatorEvent, InitiatorHandle, InitiatorService, PeerId, ResponderEvent, ResponderService,
    SessionState,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::console::{self, ConsoleCommand};
use crate::error::Result;

/// Upper bound on each step of the demo exchange
const DEMO_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Respond { name } => Self::handle_respond_command(config, name).await,
            Commands::Connect { interval } => Self::handle_connect_command(config, interval).await,
            Commands::Demo => Self::handle_demo_command(config).await,
            Commands::Config => {
                println!("{}", AppConfig::example_config()?);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Responder
    // ------------------------------------------------------------------------

    async fn handle_respond_command(mut config: AppConfig, name: Option<String>) -> Result<()> {
        if let Some(name) = name {
            config.core = config.core.with_local_name(name);
            config.core.validate()?;
        }
        info!("Advertising as {}", config.core.responder.local_name);

        let (radio, radio_events) = PlatformPeripheral::new(&config.ble).await?;
        let (responder, task) = ResponderService::spawn(radio, radio_events, &config.core);
        let printer = spawn_printer(responder.subscribe(), console::render_responder_event);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    let text = line.trim();
                    if text.is_empty() {
                        continue;
                    }
                    if let Err(e) = responder.notify(text).await {
                        println!("not sent: {}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        responder.shutdown().await?;
        finish(task, printer).await;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Initiator
    // ------------------------------------------------------------------------

    async fn handle_connect_command(config: AppConfig, interval: Option<u64>) -> Result<()> {
        let (radio, radio_events) = BtleplugCentral::new(&config.ble).await?;
        let (initiator, task) = InitiatorService::spawn(radio, radio_events, &config.core);
        let printer = spawn_printer(initiator.subscribe(), console::render_initiator_event);

        if let Some(secs) = interval {
            initiator.set_scan_interval(Duration::from_secs(secs)).await?;
        }
        initiator.start_scanning().await?;
        println!("scanning; /select <n> to connect, /quit to leave");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    match console::parse_line(&line) {
                        Ok(Some(ConsoleCommand::Quit)) => break,
                        Ok(Some(command)) => {
                            if let Err(e) = run_console_command(&initiator, command).await {
                                println!("{:#}", e);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => println!("{:#}", e),
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        initiator.shutdown().await?;
        finish(task, printer).await;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Demo
    // ------------------------------------------------------------------------

    /// Both roles on the simulated radio: discover, connect, one message each way
    async fn handle_demo_command(config: AppConfig) -> Result<()> {
        let air = VirtualAir::new();
        let initiator_id = PeerId::new("demo-initiator");

        let (peripheral, peripheral_events) = air.peripheral("demo-responder");
        let (responder, responder_task) =
            ResponderService::spawn(peripheral, peripheral_events, &config.core);
        let mut responder_events = responder.subscribe();

        let (central, central_events) = air.central(initiator_id.clone());
        let (initiator, initiator_task) =
            InitiatorService::spawn(central, central_events, &config.core);
        let mut initiator_events = initiator.subscribe();

        wait_for(&mut responder_events, |e| {
            *e == ResponderEvent::AdvertisingChanged(true)
        })
        .await?;
        println!("responder advertising");

        initiator.start_scanning().await?;
        let devices = loop {
            let event = wait_for(&mut initiator_events, |e| {
                matches!(e, InitiatorEvent::DevicesUpdated(_))
            })
            .await?;
            if let InitiatorEvent::DevicesUpdated(devices) = event {
                if !devices.is_empty() {
                    break devices;
                }
            }
        };
        println!("{}", console::render_devices(&devices));

        let peer = devices[0].id.clone();
        initiator.select_peer(peer.clone()).await?;
        wait_for(&mut initiator_events, |e| {
            matches!(
                e,
                InitiatorEvent::SessionStateChanged {
                    state: SessionState::Active,
                    ..
                }
            )
        })
        .await?;
        println!("session active with {}", peer);

        initiator.send(peer.clone(), "hi").await?;
        wait_for(&mut responder_events, |e| {
            matches!(e, ResponderEvent::MessageReceived { .. })
        })
        .await?;
        responder.notify("hello").await?;
        wait_for(&mut initiator_events, |e| {
            matches!(e, InitiatorEvent::MessageReceived { .. })
        })
        .await?;

        println!("initiator history:");
        println!("{}", console::render_history(&initiator.history(peer).await?));
        println!("responder history:");
        println!(
            "{}",
            console::render_history(&responder.history(initiator_id).await?)
        );

        initiator.shutdown().await?;
        responder.shutdown().await?;
        for task in [initiator_task, responder_task] {
            if let Err(e) = task.await {
                warn!("Engine task ended abnormally: {}", e);
            }
        }
        Ok(())
    }
}

async fn run_console_command(
    initiator: &InitiatorHandle,
    command: ConsoleCommand,
) -> anyhow::Result<()> {
    match command {
        ConsoleCommand::Select(index) => {
            let devices = initiator.devices().await?;
            let device = devices
                .get(index - 1)
                .ok_or_else(|| anyhow!("no device #{}; /devices lists them", index))?;
            initiator.select_peer(device.id.clone()).await?;
        }
        ConsoleCommand::Disconnect => {
            if !initiator.disconnect().await? {
                println!("not connected");
            }
        }
        ConsoleCommand::Devices => {
            println!("{}", console::render_devices(&initiator.devices().await?));
        }
        ConsoleCommand::Interval(interval) => {
            initiator.set_scan_interval(interval).await?;
            println!("scanning every {}s", interval.as_secs());
        }
        ConsoleCommand::History => {
            let peer = active_peer(initiator).await?;
            println!("{}", console::render_history(&initiator.history(peer).await?));
        }
        ConsoleCommand::Send(text) => {
            let peer = active_peer(initiator).await?;
            initiator.send(peer, text).await?;
        }
        ConsoleCommand::Quit => {}
    }
    Ok(())
}

async fn active_peer(initiator: &InitiatorHandle) -> anyhow::Result<PeerId> {
    match initiator.session_state().await? {
        (Some(peer), SessionState::Active) => Ok(peer),
        (Some(peer), state) => Err(anyhow!("session with {} is still {}", peer, state)),
        (None, _) => Err(anyhow!("not connected; /select a device first")),
    }
}

fn spawn_printer<E, F>(mut events: broadcast::Receiver<E>, render: F) -> JoinHandle<()>
where
    E: Clone + Send + 'static,
    F: Fn(&E) -> Option<String> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(text) = render(&event) {
                        println!("{}", text);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn finish(task: JoinHandle<()>, printer: JoinHandle<()>) {
    if let Err(e) = task.await {
        error!("Engine task ended abnormally: {}", e);
    }
    printer.abort();
}

async fn wait_for<E, F>(events: &mut broadcast::Receiver<E>, mut predicate: F) -> anyhow::Result<E>
where
    E: Clone,
    F: FnMut(&E) -> bool,
{
    timeout(DEMO_STEP_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Ok(event),
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return Err(anyhow!("engine stopped")),
            }
        }
    })
    .await
    .context("demo step timed out")?
}
