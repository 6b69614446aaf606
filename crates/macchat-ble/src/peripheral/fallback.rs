//! Peripheral stand-in for platforms without a GATT server binding

use macchat_core::{
    Advertisement, PeripheralEvent, PeripheralEventReceiver, PeripheralRadio, RadioError,
    RadioState, RequestId, ServiceDefinition, SubscriberRef, UpdateOutcome, WriteStatus,
};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::config::BleConfig;
use crate::error::BleError;

// ----------------------------------------------------------------------------
// Fallback Implementation
// ----------------------------------------------------------------------------

/// Always reports [`RadioState::Unsupported`]
pub struct UnsupportedPeripheral {
    _events: mpsc::UnboundedSender<PeripheralEvent>,
}

impl UnsupportedPeripheral {
    pub async fn new(_config: &BleConfig) -> Result<(Self, PeripheralEventReceiver), BleError> {
        warn!("Peripheral role is not supported on this platform");
        let (events, receiver) = mpsc::unbounded_channel();
        let _ = events.send(PeripheralEvent::StateChanged(RadioState::Unsupported));
        Ok((Self { _events: events }, receiver))
    }

    fn refuse(operation: &str) -> RadioError {
        BleError::Unsupported(operation.to_string()).into()
    }
}

impl PeripheralRadio for UnsupportedPeripheral {
    fn state(&self) -> RadioState {
        RadioState::Unsupported
    }

    fn register_service(&mut self, _service: &ServiceDefinition) -> Result<(), RadioError> {
        Err(Self::refuse("register service"))
    }

    fn start_advertising(&mut self, _advertisement: &Advertisement) -> Result<(), RadioError> {
        Err(Self::refuse("advertise"))
    }

    fn stop_advertising(&mut self) -> Result<(), RadioError> {
        Ok(())
    }

    fn update_value(
        &mut self,
        _attribute: Uuid,
        _value: &[u8],
        _subscribers: &[SubscriberRef],
    ) -> UpdateOutcome {
        UpdateOutcome::BufferFull
    }

    fn respond(&mut self, _request: RequestId, _status: WriteStatus) -> Result<(), RadioError> {
        Err(Self::refuse("respond"))
    }
}

#[cfg(test)]
mod tests {
    use macchat_core::{EventPublisher, Readiness, ResponderConfig, ResponderEngine};

    use super::*;

    #[tokio::test]
    async fn test_responder_stays_unready() {
        let (radio, mut events) = UnsupportedPeripheral::new(&BleConfig::default())
            .await
            .unwrap();
        let mut engine =
            ResponderEngine::new(radio, ResponderConfig::default(), EventPublisher::new(8));
        engine.start();
        while let Ok(event) = events.try_recv() {
            engine.handle_event(event);
        }

        assert_eq!(engine.readiness(), Readiness::Unready);
        assert!(!engine.is_advertising());
    }
}
