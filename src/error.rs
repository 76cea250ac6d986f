//! Error types for the redbutton-ble crate.

use thiserror::Error;

use crate::capability::Capability;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// A required capability was not granted.
    ///
    /// The operation that hit this is abandoned; it is never retried
    /// automatically.
    #[error("capability denied: {needed:?}")]
    CapabilityDenied {
        /// The capabilities that were required but not granted.
        needed: Vec<Capability>,
    },

    /// The platform scan primitive reported an error code.
    #[error("scan failed with platform code {code}")]
    ScanFailed {
        /// The raw platform error code.
        code: i32,
    },

    /// Bonding with the peer was rejected or cancelled.
    #[error("bonding failed for {address}: {reason}")]
    BondFailed {
        /// Address of the peer the bond attempt targeted.
        address: String,
        /// Description of why bonding failed.
        reason: String,
    },

    /// Failed to establish or keep a transport connection to the peer.
    #[error("connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// Service not found on the device.
    #[error("service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// Characteristic not found on the device.
    #[error("characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// The command write was rejected by the peer or the transport.
    #[error("command write failed: {reason}")]
    WriteFailed {
        /// Description of why the write failed.
        reason: String,
    },

    /// Operation requires a connection but the peer is not connected.
    #[error("peer not connected")]
    NotConnected,

    /// The specified peer is not in the device registry.
    #[error("peer not found: {address}")]
    PeerNotFound {
        /// The address that was looked up.
        address: String,
    },

    /// An invalid parameter was provided.
    #[error("invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check whether this error is a capability denial.
    pub fn is_capability_denied(&self) -> bool {
        matches!(self, Self::CapabilityDenied { .. })
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
