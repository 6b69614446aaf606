//! Responder engine: readiness, advertising, subscribers and backpressure

use macchat_core::sim::VirtualAir;
use macchat_core::*;

mod test_utils;
use test_utils::{drain, Rig};

fn responder(air: &VirtualAir) -> (ResponderEngine<macchat_core::sim::SimPeripheral>, PeripheralEventReceiver) {
    let (radio, events) = air.peripheral("responder");
    let engine = ResponderEngine::new(radio, ResponderConfig::default(), EventPublisher::new(64));
    (engine, events)
}

fn settle(
    engine: &mut ResponderEngine<macchat_core::sim::SimPeripheral>,
    events: &mut PeripheralEventReceiver,
) {
    while let Ok(event) = events.try_recv() {
        engine.handle_event(event);
    }
}

fn subscriber(id: &str) -> SubscriberRef {
    SubscriberRef::new(PeerId::new(id))
}

// ----------------------------------------------------------------------------
// Readiness and Advertising
// ----------------------------------------------------------------------------

#[test]
fn test_power_on_registers_then_advertises() {
    let air = VirtualAir::new();
    let id = PeerId::new("responder");
    let (mut engine, mut events) = responder(&air);
    air.set_power(&id, RadioState::PoweredOff);
    let mut published = engine.events().subscribe();

    engine.start();
    settle(&mut engine, &mut events);
    assert_eq!(engine.readiness(), Readiness::Unready);
    assert!(!air.is_advertising(&id));

    air.set_power(&id, RadioState::PoweredOn);
    settle(&mut engine, &mut events);

    assert!(engine.is_ready());
    assert!(engine.is_registered());
    assert!(engine.is_advertising());
    assert!(air.is_advertising(&id));
    assert!(drain(&mut published).contains(&ResponderEvent::AdvertisingChanged(true)));
}

#[test]
fn test_registration_failure_blocks_advertising() {
    let air = VirtualAir::new();
    let (mut engine, mut events) = responder(&air);
    let mut published = engine.events().subscribe();
    air.reject_registration(&PeerId::new("responder"), Some("service busy".to_string()));

    engine.start();
    settle(&mut engine, &mut events);

    assert!(engine.is_ready());
    assert!(!engine.is_registered());
    assert!(!engine.is_advertising());
    assert!(drain(&mut published)
        .contains(&ResponderEvent::RegistrationFailed("service busy".to_string())));
    assert!(matches!(
        engine.start_advertising(),
        Err(ResponderError::RegistrationFailed(_))
    ));
}

#[test]
fn test_power_cycle_reregisters() {
    let air = VirtualAir::new();
    let id = PeerId::new("responder");
    let (mut engine, mut events) = responder(&air);
    engine.start();
    settle(&mut engine, &mut events);

    air.set_power(&id, RadioState::PoweredOff);
    settle(&mut engine, &mut events);
    assert_eq!(engine.readiness(), Readiness::Unready);
    assert!(!engine.is_advertising());
    assert_eq!(engine.notify("x"), Err(ResponderError::NotReady));

    air.set_power(&id, RadioState::PoweredOn);
    settle(&mut engine, &mut events);
    assert!(engine.is_advertising());
}

#[test]
fn test_stop_advertising_keeps_subscribers() {
    let mut rig = Rig::new(&["alpha"]);
    rig.connect("alpha");
    let central = rig.central_id();

    let slot = rig.responder("alpha");
    slot.engine.stop_advertising().unwrap();
    assert!(!slot.engine.is_advertising());
    assert_eq!(slot.engine.subscribers(), &[SubscriberRef::new(central)]);
    assert!(slot.engine.notify("still delivered").is_ok());

    rig.pump();
    assert_eq!(
        rig.initiator.messages(&PeerId::new("alpha")),
        vec!["still delivered"]
    );
}

// ----------------------------------------------------------------------------
// Subscribers
// ----------------------------------------------------------------------------

#[test]
fn test_duplicate_subscribe_leaves_stale_entry_after_one_unsubscribe() {
    let air = VirtualAir::new();
    let (mut engine, mut events) = responder(&air);
    engine.start();
    settle(&mut engine, &mut events);

    for _ in 0..2 {
        engine.handle_event(PeripheralEvent::Subscribed {
            subscriber: subscriber("c1"),
            attribute: OUTBOUND_CHANNEL_UUID,
        });
    }
    engine.handle_event(PeripheralEvent::Unsubscribed {
        subscriber: subscriber("c1"),
        attribute: OUTBOUND_CHANNEL_UUID,
    });

    assert_eq!(engine.subscribers(), &[subscriber("c1")]);
}

#[test]
fn test_unsubscribe_matches_by_peer_identity() {
    let air = VirtualAir::new();
    let (mut engine, mut events) = responder(&air);
    engine.start();
    settle(&mut engine, &mut events);

    engine.handle_event(PeripheralEvent::Subscribed {
        subscriber: subscriber("c1"),
        attribute: OUTBOUND_CHANNEL_UUID,
    });
    engine.handle_event(PeripheralEvent::Subscribed {
        subscriber: subscriber("c2"),
        attribute: OUTBOUND_CHANNEL_UUID,
    });
    // A freshly built reference for the same peer
    engine.handle_event(PeripheralEvent::Unsubscribed {
        subscriber: SubscriberRef::new(PeerId::new("c1")),
        attribute: OUTBOUND_CHANNEL_UUID,
    });

    assert_eq!(engine.subscribers(), &[subscriber("c2")]);
}

// ----------------------------------------------------------------------------
// Notify and Writes
// ----------------------------------------------------------------------------

#[test]
fn test_full_buffer_fails_notify_without_retry() {
    let mut rig = Rig::new(&["alpha"]);
    rig.connect("alpha");
    let alpha = PeerId::new("alpha");
    let central = rig.central_id();
    drain(&mut rig.events);

    rig.air.set_buffer_full(&alpha, true);
    let slot = rig.responder("alpha");
    drain(&mut slot.events);
    assert_eq!(slot.engine.notify("hello"), Err(ResponderError::BufferFull));
    assert!(slot.engine.messages(&central).is_empty());
    rig.pump();

    assert!(rig.initiator.messages(&alpha).is_empty());
    assert!(drain(&mut rig.events).is_empty());

    // Draining the buffer is only signalled; nothing is resent
    rig.air.set_buffer_full(&alpha, false);
    rig.pump();
    assert_eq!(
        drain(&mut rig.responder("alpha").events),
        vec![ResponderEvent::ReadyToUpdate]
    );
    assert!(rig.initiator.messages(&alpha).is_empty());
}

#[test]
fn test_notify_without_subscribers() {
    let air = VirtualAir::new();
    let (mut engine, mut events) = responder(&air);
    engine.start();
    settle(&mut engine, &mut events);

    assert_eq!(engine.notify("anyone?"), Err(ResponderError::NoSubscribers));
}

#[test]
fn test_undecodable_write_is_acknowledged_and_dropped() {
    let air = VirtualAir::new();
    let id = PeerId::new("responder");
    let (mut engine, mut events) = responder(&air);
    engine.start();
    settle(&mut engine, &mut events);

    let central = PeerId::new("c1");
    air.inject_write(&central, &id, INBOUND_CHANNEL_UUID, &[0xc3, 0x28]);
    air.inject_write(&central, &id, INBOUND_CHANNEL_UUID, "héllo".as_bytes());
    settle(&mut engine, &mut events);

    assert_eq!(engine.messages(&central), vec!["héllo"]);
    let statuses: Vec<WriteStatus> = air.responses(&id).into_iter().map(|(_, s)| s).collect();
    assert_eq!(statuses, vec![WriteStatus::Success, WriteStatus::Success]);
}

#[test]
fn test_write_to_foreign_attribute_is_refused() {
    let air = VirtualAir::new();
    let id = PeerId::new("responder");
    let (mut engine, mut events) = responder(&air);
    engine.start();
    settle(&mut engine, &mut events);

    air.inject_write(&PeerId::new("c1"), &id, OUTBOUND_CHANNEL_UUID, b"hi");
    settle(&mut engine, &mut events);

    assert!(engine.store().is_empty());
    assert_eq!(
        air.responses(&id)
            .into_iter()
            .map(|(_, s)| s)
            .collect::<Vec<_>>(),
        vec![WriteStatus::RequestNotSupported]
    );
}

#[test]
fn test_notify_records_outbound_history_per_subscriber() {
    let mut rig = Rig::new(&["alpha"]);
    rig.connect("alpha");
    let central = rig.central_id();

    rig.responder("alpha").engine.notify("one").unwrap();
    rig.pump();
    rig.initiator.send(&PeerId::new("alpha"), "two").unwrap();
    rig.pump();

    let history = rig.responder("alpha").engine.history(&central);
    assert_eq!(
        history,
        vec![
            MessageRecord::outbound(central.clone(), "one"),
            MessageRecord::inbound(central.clone(), "two"),
        ]
    );
}

#[test]
fn test_stale_duplicate_subscriber_gets_one_delivery() {
    let mut rig = Rig::new(&["alpha"]);
    rig.connect("alpha");
    let central = rig.central_id();
    let alpha = PeerId::new("alpha");

    rig.responder("alpha")
        .engine
        .handle_event(PeripheralEvent::Subscribed {
            subscriber: SubscriberRef::new(central.clone()),
            attribute: OUTBOUND_CHANNEL_UUID,
        });
    assert_eq!(rig.responder("alpha").engine.subscribers().len(), 2);

    rig.responder("alpha").engine.notify("x").unwrap();
    rig.pump();

    assert_eq!(rig.responder("alpha").engine.messages(&central), vec!["x"]);
    assert_eq!(rig.initiator.messages(&alpha), vec!["x"]);
}
