//! Bluetooth Low Energy radios for the MacChat engines
//!
//! This crate implements the radio capabilities from `macchat-core` on top of
//! the host Bluetooth stack, so the same engines that run against the
//! simulated air in tests drive real hardware.
//!
//! ## Architecture
//!
//! - [`config`] - Adapter selection and queue sizing
//! - [`error`] - Error types specific to the BLE adapters
//! - [`central`] - Initiator radio over btleplug (Linux, macOS, Windows)
//! - [`peripheral`] - Responder radio over BlueZ, with a fallback elsewhere
//!
//! ## Usage
//!
//! ```rust,no_run
//! use macchat_ble::{BleConfig, BtleplugCentral};
//! use macchat_core::{InitiatorService, MacchatConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (radio, radio_events) = BtleplugCentral::new(&BleConfig::default()).await?;
//! let (handle, _task) = InitiatorService::spawn(radio, radio_events, &MacchatConfig::default());
//!
//! handle.start_scanning().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Support
//!
//! - **Central role**: every platform btleplug supports
//! - **Peripheral role**: Linux via `bluer` and BlueZ; other platforms report
//!   an unsupported radio

pub mod central;
pub mod config;
pub mod error;
pub mod peripheral;

// Public API exports
pub use central::BtleplugCentral;
pub use config::BleConfig;
pub use error::BleError;
pub use peripheral::{PlatformPeripheral, UnsupportedPeripheral};
#[cfg(target_os = "linux")]
pub use peripheral::BluezPeripheral;
