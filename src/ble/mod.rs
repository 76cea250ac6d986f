//! BLE communication module.
//!
//! The discovery-to-command-delivery pipeline: advertisement intake,
//! name-filtered scanning, bonding coordination and the GATT transport the
//! link connector drives.

pub mod advertising;
pub mod bonding;
pub mod connector;
pub mod scanner;
pub mod transport;
pub mod uuids;

pub use advertising::{Advertisement, AdvertisementEvent, AdvertisementSource, BtleAdvertisementSource};
pub use bonding::{AttemptRegistry, BondCoordinator, BondingBackend, PlatformBonding};
pub use connector::LinkConnector;
pub use scanner::{ScanEvent, ScanFilter, ScanSession, StopReason};
pub use transport::{BtleLinkFactory, BtleTransport, LaunchTransport, LinkFactory, ServiceGraph};
pub use uuids::*;
