//! Scan scheduling, publication gating and registry/session decoupling

use std::time::Duration;

use macchat_core::*;

mod test_utils;
use test_utils::{drain, Rig};

fn device_lists(events: Vec<InitiatorEvent>) -> Vec<Vec<PeerId>> {
    events
        .into_iter()
        .filter_map(|event| match event {
            InitiatorEvent::DevicesUpdated(devices) => {
                Some(devices.into_iter().map(|d| d.id).collect())
            }
            _ => None,
        })
        .collect()
}

#[test]
fn test_responder_discovered_within_first_window() {
    let mut rig = Rig::new(&["alpha"]);
    rig.start_responders();
    assert!(rig.air.is_advertising(&PeerId::new("alpha")));

    let window_start = rig.now;
    rig.initiator.start_scanning(rig.now);
    rig.pump();
    rig.advance(Duration::from_secs(3));

    let descriptor = rig
        .initiator
        .registry()
        .get(&PeerId::new("alpha"))
        .cloned()
        .expect("responder registered");
    assert_eq!(descriptor.name, LOCAL_NAME);
    assert!(descriptor.last_seen >= window_start);
    assert!(descriptor.last_seen <= rig.now);
    assert_eq!(rig.initiator.devices(), vec![descriptor]);
}

#[test]
fn test_nothing_published_while_window_open() {
    let mut rig = Rig::new(&["alpha", "beta"]);
    rig.start_responders();
    rig.scan_once();
    assert_eq!(
        device_lists(drain(&mut rig.events)),
        vec![vec![PeerId::new("alpha"), PeerId::new("beta")]]
    );

    // Second window opens; beta vanishes and a hit for alpha arrives mid-window
    rig.air.set_visible(&PeerId::new("beta"), false);
    rig.advance(Duration::from_secs(7));
    assert!(device_lists(drain(&mut rig.events)).is_empty());
    rig.advance(Duration::from_secs(1));
    rig.air.advertise_tick();
    rig.pump();
    assert!(device_lists(drain(&mut rig.events)).is_empty());
    assert_eq!(rig.initiator.devices().len(), 2);

    // Exactly one snapshot at the close, with beta pruned
    rig.advance(Duration::from_secs(2));
    assert_eq!(
        device_lists(drain(&mut rig.events)),
        vec![vec![PeerId::new("alpha")]]
    );
}

#[test]
fn test_stop_republishes_completed_snapshot() {
    let mut rig = Rig::new(&["alpha"]);
    rig.start_responders();
    rig.scan_once();
    drain(&mut rig.events);

    // Stop mid-window: the half-filled window is discarded
    rig.advance(Duration::from_secs(8));
    rig.initiator.stop_scanning();

    let events = drain(&mut rig.events);
    assert_eq!(events[0], InitiatorEvent::ScanningChanged(false));
    assert_eq!(device_lists(events), vec![vec![PeerId::new("alpha")]]);
    assert!(!rig.air.is_scanning(&rig.central_id()));
    assert_eq!(rig.initiator.next_deadline(), None);
}

#[test]
fn test_interval_change_applies_from_next_boundary() {
    let mut rig = Rig::new(&["alpha"]);
    rig.start_responders();
    rig.scan_once();

    rig.initiator
        .set_scan_interval(Duration::from_secs(30), rig.now)
        .unwrap();
    assert_eq!(rig.initiator.scan_interval(), Duration::from_secs(30));
    assert_eq!(
        rig.initiator.next_deadline(),
        Some(rig.now + Duration::from_secs(30))
    );

    // The old 10s boundary no longer fires
    rig.advance(Duration::from_secs(10));
    assert!(!rig.air.is_scanning(&rig.central_id()));

    assert!(matches!(
        rig.initiator.set_scan_interval(Duration::from_secs(2), rig.now),
        Err(ConfigError::Invalid { .. })
    ));
}

#[test]
fn test_unready_radio_skips_discovery() {
    let mut rig = Rig::new(&["alpha"]);
    rig.start_responders();
    let central = rig.central_id();
    rig.air.set_power(&central, RadioState::PoweredOff);
    rig.pump();

    rig.scan_once();
    assert!(rig.initiator.registry().is_empty());
    assert!(rig.initiator.is_scanning());

    // Power returns; the next cycle discovers normally
    rig.air.set_power(&central, RadioState::PoweredOn);
    rig.advance(Duration::from_secs(7));
    rig.advance(Duration::from_secs(3));
    assert_eq!(rig.initiator.devices().len(), 1);
}

#[test]
fn test_connected_peer_pruned_but_session_stays_active() {
    let mut rig = Rig::new(&["alpha"]);
    rig.connect("alpha");
    let alpha = PeerId::new("alpha");
    drain(&mut rig.events);

    // Alpha stops advertising; the next window does not see it
    rig.responder("alpha").engine.stop_advertising().unwrap();
    rig.pump();
    rig.advance(Duration::from_secs(7));
    rig.advance(Duration::from_secs(3));

    let events = drain(&mut rig.events);
    assert_eq!(device_lists(events.clone()), vec![Vec::<PeerId>::new()]);
    assert!(!events
        .iter()
        .any(|e| matches!(e, InitiatorEvent::DeviceDisconnected { .. })));
    assert!(!rig.initiator.registry().contains(&alpha));
    assert_eq!(rig.initiator.active_peer(), Some(&alpha));

    // The session still carries traffic until a disconnect arrives
    rig.initiator.send(&alpha, "still here").unwrap();
    rig.pump();
    let central = rig.central_id();
    assert_eq!(
        rig.responder("alpha").engine.messages(&central),
        vec!["still here"]
    );
}
