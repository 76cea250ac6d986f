// Allow holding locks across await points - we use parking_lot which is designed for this
#![allow(clippy::await_holding_lock)]
// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # redbutton-ble
//!
//! A cross-platform Rust library for driving a physical "launch button"
//! console over Bluetooth Low Energy.
//!
//! The controller hunts for a peripheral advertising a known name,
//! establishes a trusted link, delivers the launch command with a single
//! characteristic write, and on confirmed delivery drives a 10-second
//! countdown with an audio cue per tick and a haptic cue at zero.
//!
//! ## Features
//!
//! - **Discovery**: bounded, name-filtered scan passes with single-shot or
//!   continuous matching
//! - **Bonding**: idempotent per-peer bond attempts behind a session
//!   registry
//! - **Command delivery**: connect → discover → write as one tracked
//!   attempt with exactly-once outcome reporting
//! - **Countdown**: cancellable tick-per-second state machine feeding
//!   audio/haptic sinks and an LCD-style display
//! - **Capability gating**: scan/bond/connect each sit behind a pluggable
//!   permission gate; denied operations abandon cleanly and can resume on
//!   a later grant
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use redbutton_ble::{AppController, ControllerEvent, LaunchConfig, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let controller = AppController::bluetooth(LaunchConfig::default()).await?;
//!     let mut events = controller.subscribe();
//!
//!     controller.start_scan().await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!         if let ControllerEvent::CountdownStarted { remaining } = event {
//!             println!("T-minus {}...", remaining);
//!         }
//!     }
//!
//!     controller.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps. Peer addresses are the platform's
//! stable peripheral identifiers rather than hardware addresses.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for configuration and
//!   snapshot types

// Public modules
pub mod ble;
pub mod capability;
pub mod config;
pub mod controller;
pub mod countdown;
pub mod device;
pub mod error;
pub mod feedback;

// Re-exports for convenience
pub use controller::{AppController, ControllerEvent, ControllerSnapshot, LaunchOutcome};
pub use error::{Error, Result};

// Re-export commonly used types from submodules
pub use ble::advertising::{Advertisement, AdvertisementEvent, AdvertisementSource};
pub use ble::bonding::{BondEvent, BondOutcome, BondResult, BondUpdate, BondingBackend};
pub use ble::connector::LinkEvent;
pub use ble::scanner::{ScanEvent, ScanFilter, StopReason};
pub use ble::transport::{LaunchTransport, LinkFactory, ServiceGraph, TransportEvent};
pub use capability::{Capability, CapabilityGate, GrantedGate, StaticGate};
pub use config::{BondPolicy, CommandSpec, LaunchConfig, ScanMode};
pub use countdown::{CountdownCoordinator, CountdownEvent, CountdownSnapshot};
pub use device::{BondState, DeviceRegistry, LinkState, PeerDevice};
pub use feedback::{FeedbackSink, NullFeedback, TracingFeedback};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<AppController>();
        let _ = std::any::TypeId::of::<LaunchConfig>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<CountdownCoordinator>();
        let _ = std::any::TypeId::of::<PeerDevice>();
        let _ = std::any::TypeId::of::<ServiceGraph>();
        let _ = std::any::TypeId::of::<ControllerSnapshot>();
    }

    #[test]
    fn test_default_config_matches_the_console() {
        let config = LaunchConfig::default();
        assert_eq!(config.target_name, ble::uuids::DEFAULT_TARGET_NAME);
        assert_eq!(config.command.service, ble::uuids::LAUNCH_SERVICE_UUID);
    }
}
