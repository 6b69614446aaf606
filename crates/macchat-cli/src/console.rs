//! Line-oriented console: input parsing and event rendering

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use macchat_core::{
    Direction, DisconnectReason, InitiatorEvent, MessageRecord, PeerDescriptor, ResponderEvent,
};

// ----------------------------------------------------------------------------
// Input
// ----------------------------------------------------------------------------

/// One line typed at the initiator prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Connect to the n-th listed device (1-based)
    Select(usize),
    Disconnect,
    Devices,
    Interval(Duration),
    History,
    Quit,
    /// Anything that is not a command is chat text
    Send(String),
}

/// Parse a prompt line; blank lines yield `None`
pub fn parse_line(line: &str) -> anyhow::Result<Option<ConsoleCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(ConsoleCommand::Send(line.to_string())));
    };

    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let argument = parts.next();
    let parsed = match name {
        "select" => {
            let index: usize = argument
                .ok_or_else(|| anyhow!("usage: /select <n>"))?
                .parse()
                .context("device number must be a positive integer")?;
            if index == 0 {
                bail!("devices are numbered from 1");
            }
            ConsoleCommand::Select(index)
        }
        "interval" => {
            let secs: u64 = argument
                .ok_or_else(|| anyhow!("usage: /interval <secs>"))?
                .parse()
                .context("interval must be a whole number of seconds")?;
            ConsoleCommand::Interval(Duration::from_secs(secs))
        }
        "disconnect" => ConsoleCommand::Disconnect,
        "devices" => ConsoleCommand::Devices,
        "history" => ConsoleCommand::History,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => bail!("unknown command /{}", other),
    };
    Ok(Some(parsed))
}

// ----------------------------------------------------------------------------
// Output
// ----------------------------------------------------------------------------

pub fn render_devices(devices: &[PeerDescriptor]) -> String {
    if devices.is_empty() {
        return "no devices in range".to_string();
    }
    devices
        .iter()
        .enumerate()
        .map(|(i, d)| format!("{:>3}. {} [{}] {} dBm", i + 1, d.name, d.id, d.signal_strength))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_history(records: &[MessageRecord]) -> String {
    records
        .iter()
        .map(|record| match record.direction {
            Direction::Inbound => format!("<- {}", record.text),
            Direction::Outbound => format!("-> {}", record.text),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text shown to the user for an initiator event, if any
pub fn render_initiator_event(event: &InitiatorEvent) -> Option<String> {
    match event {
        InitiatorEvent::DevicesUpdated(devices) => Some(render_devices(devices)),
        InitiatorEvent::MessageReceived { peer_id, text } => Some(format!("[{}] {}", peer_id, text)),
        InitiatorEvent::DeviceDisconnected { peer_id, reason } => match reason {
            DisconnectReason::Local => None,
            other => Some(format!("disconnected from {}: {}", peer_id, other)),
        },
        InitiatorEvent::ConnectionFailed { peer_id, reason } => {
            Some(format!("could not connect to {}: {}", peer_id, reason))
        }
        InitiatorEvent::SessionStateChanged { peer_id, state } => {
            Some(format!("session with {}: {}", peer_id, state))
        }
        InitiatorEvent::SendFailed { peer_id, reason } => {
            Some(format!("message to {} not delivered: {}", peer_id, reason))
        }
        InitiatorEvent::ScanningChanged(_) => None,
    }
}

/// Text shown to the user for a responder event, if any
pub fn render_responder_event(event: &ResponderEvent) -> Option<String> {
    match event {
        ResponderEvent::MessageReceived { peer_id, text } => Some(format!("[{}] {}", peer_id, text)),
        ResponderEvent::SubscriberAdded(subscriber) => {
            Some(format!("{} joined", subscriber.peer_id()))
        }
        ResponderEvent::SubscriberRemoved(subscriber) => {
            Some(format!("{} left", subscriber.peer_id()))
        }
        ResponderEvent::AdvertisingChanged(true) => Some("advertising".to_string()),
        ResponderEvent::AdvertisingChanged(false) => Some("advertising stopped".to_string()),
        ResponderEvent::RegistrationFailed(reason) => {
            Some(format!("service registration failed: {}", reason))
        }
        ResponderEvent::RadioStateChanged(_) | ResponderEvent::ReadyToUpdate => None,
    }
}

#[cfg(test)]
mod tests {
    use macchat_core::{PeerHandle, PeerId};
    use tokio::time::Instant;

    use super::*;

    #[test]
    fn test_plain_text_is_sent() {
        assert_eq!(
            parse_line("  hello there ").unwrap(),
            Some(ConsoleCommand::Send("hello there".to_string()))
        );
        assert_eq!(parse_line("   ").unwrap(), None);
    }

    #[test]
    fn test_commands() {
        assert_eq!(parse_line("/select 2").unwrap(), Some(ConsoleCommand::Select(2)));
        assert_eq!(
            parse_line("/interval 30").unwrap(),
            Some(ConsoleCommand::Interval(Duration::from_secs(30)))
        );
        assert_eq!(parse_line("/disconnect").unwrap(), Some(ConsoleCommand::Disconnect));
        assert_eq!(parse_line("/exit").unwrap(), Some(ConsoleCommand::Quit));
    }

    #[test]
    fn test_bad_commands_are_errors() {
        assert!(parse_line("/select").is_err());
        assert!(parse_line("/select 0").is_err());
        assert!(parse_line("/interval soon").is_err());
        assert!(parse_line("/teleport").is_err());
    }

    #[test]
    fn test_devices_are_numbered_from_one() {
        let devices = vec![PeerDescriptor {
            id: PeerId::new("aa"),
            name: "MacChat".to_string(),
            signal_strength: -42,
            last_seen: Instant::now(),
            handle: PeerHandle::new(1),
        }];
        assert_eq!(render_devices(&devices), "  1. MacChat [aa] -42 dBm");
        assert_eq!(render_devices(&[]), "no devices in range");
    }

    #[test]
    fn test_local_disconnect_is_silent() {
        let event = InitiatorEvent::DeviceDisconnected {
            peer_id: PeerId::new("aa"),
            reason: DisconnectReason::Local,
        };
        assert_eq!(render_initiator_event(&event), None);
    }
}
