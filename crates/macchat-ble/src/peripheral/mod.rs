//! Responder radio adapters and platform selection
//!
//! BlueZ is the only stack with a usable GATT server binding; elsewhere the
//! responder reports an unsupported radio and refuses every request.

pub mod fallback;
#[cfg(target_os = "linux")]
pub mod linux;

pub use fallback::UnsupportedPeripheral;
#[cfg(target_os = "linux")]
pub use linux::BluezPeripheral;

/// Peripheral adapter for the current build target
#[cfg(target_os = "linux")]
pub type PlatformPeripheral = linux::BluezPeripheral;

/// Peripheral adapter for the current build target
#[cfg(not(target_os = "linux"))]
pub type PlatformPeripheral = fallback::UnsupportedPeripheral;
