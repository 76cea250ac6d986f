//! Capability gating for radio operations.
//!
//! Scanning, bonding and connecting each require platform capabilities
//! (Android runtime permissions, macOS privacy prompts, BlueZ group
//! membership). The core never talks to a permission UI itself; it asks a
//! [`CapabilityGate`] and abandons the operation on denial.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;

#[cfg(test)]
use mockall::automock;

/// A capability the controller may need before touching the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Capability {
    /// Permission to run BLE discovery.
    Scan,
    /// Permission to initiate platform bonding.
    Bond,
    /// Permission to open a GATT connection.
    Connect,
}

/// Capabilities required before a scan may start.
pub const SCAN_CAPABILITIES: &[Capability] = &[Capability::Scan, Capability::Connect];

/// Capabilities required before a bond attempt may be issued.
pub const BOND_CAPABILITIES: &[Capability] = &[Capability::Bond, Capability::Connect];

/// Capabilities required before a transport connection may be opened.
pub const CONNECT_CAPABILITIES: &[Capability] = &[Capability::Connect];

/// Gate over a capability set: a pure predicate plus a request trigger.
///
/// `request_capability` resolves once the platform's grant/deny flow
/// completes. A denial is final for the calling operation; the core never
/// schedules an automatic retry.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CapabilityGate: Send + Sync {
    /// Check whether every capability in the set is currently granted.
    fn has_capability(&self, capabilities: &[Capability]) -> bool;

    /// Ask the platform to grant the set. Returns `true` on a full grant.
    async fn request_capability(&self, capabilities: &[Capability]) -> bool;
}

/// Gate that grants everything.
///
/// The right default on desktop platforms, where the OS surfaces its own
/// prompt the first time the process touches Bluetooth.
pub struct GrantedGate;

#[async_trait]
impl CapabilityGate for GrantedGate {
    fn has_capability(&self, _capabilities: &[Capability]) -> bool {
        true
    }

    async fn request_capability(&self, _capabilities: &[Capability]) -> bool {
        true
    }
}

/// Gate backed by an explicit grant set.
///
/// Requests never widen the set; grants arrive out of band via
/// [`StaticGate::grant`]. Useful for headless deployments and for driving
/// the denied paths in tests.
#[derive(Default)]
pub struct StaticGate {
    granted: RwLock<HashSet<Capability>>,
}

impl StaticGate {
    /// Create a gate with nothing granted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a gate with the given capabilities granted.
    pub fn with_granted(capabilities: &[Capability]) -> Self {
        Self {
            granted: RwLock::new(capabilities.iter().copied().collect()),
        }
    }

    /// Grant a capability.
    pub fn grant(&self, capability: Capability) {
        self.granted.write().insert(capability);
    }

    /// Revoke a capability.
    pub fn revoke(&self, capability: Capability) {
        self.granted.write().remove(&capability);
    }
}

#[async_trait]
impl CapabilityGate for StaticGate {
    fn has_capability(&self, capabilities: &[Capability]) -> bool {
        let granted = self.granted.read();
        capabilities.iter().all(|c| granted.contains(c))
    }

    async fn request_capability(&self, capabilities: &[Capability]) -> bool {
        self.has_capability(capabilities)
    }
}
