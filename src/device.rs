//! Peer device records and the session-scoped device registry.
//!
//! A [`PeerDevice`] is created the first time an accepted advertisement is
//! observed and lives until explicit eviction or shutdown; nothing is
//! persisted across sessions. Bond state is mutated only by the bond
//! coordinator, link state only by the link connector.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::ble::advertising::Advertisement;

/// Platform bond state of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BondState {
    /// No trusted relationship with the peer.
    #[default]
    None,
    /// A bond attempt is in flight.
    Bonding,
    /// A trusted relationship exists.
    Bonded,
}

impl BondState {
    /// Check if bonded.
    pub fn is_bonded(&self) -> bool {
        matches!(self, Self::Bonded)
    }
}

impl std::fmt::Display for BondState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Bonding => write!(f, "Bonding"),
            Self::Bonded => write!(f, "Bonded"),
        }
    }
}

/// Link state of a peer, driven by the connector state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LinkState {
    /// No transport connection.
    #[default]
    Disconnected,
    /// Transport connection being established.
    Connecting,
    /// Transport connected, discovery not yet started.
    Connected,
    /// Service/characteristic discovery in flight.
    Discovering,
    /// Command service and characteristic resolved.
    Ready,
    /// The command write has been issued.
    WriteSent,
    /// The command was delivered.
    Done,
    /// Transport handle being released.
    Closing,
}

impl LinkState {
    /// Check whether an attempt is currently using the link.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Discovering => write!(f, "Discovering"),
            Self::Ready => write!(f, "Ready"),
            Self::WriteSent => write!(f, "WriteSent"),
            Self::Done => write!(f, "Done"),
            Self::Closing => write!(f, "Closing"),
        }
    }
}

/// Mutable attributes of a peer.
struct PeerState {
    /// Name from the most recent advertisement.
    advertised_name: String,
    /// Current bond state.
    bond_state: BondState,
    /// Current link state.
    link_state: LinkState,
    /// Signal strength from the most recent advertisement.
    rssi: Option<i16>,
}

/// A discovered launch peripheral, identified by its stable address.
///
/// On platforms that hide hardware addresses (macOS) the address is the
/// platform's stable peripheral identifier instead.
pub struct PeerDevice {
    /// Stable identity string.
    address: String,
    /// Interior state.
    state: RwLock<PeerState>,
}

impl PeerDevice {
    /// Create a record for a newly observed peer.
    pub fn new(address: impl Into<String>, advertised_name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            state: RwLock::new(PeerState {
                advertised_name: advertised_name.into(),
                bond_state: BondState::None,
                link_state: LinkState::Disconnected,
                rssi: None,
            }),
        }
    }

    /// Get the stable address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Get the advertised name.
    pub fn advertised_name(&self) -> String {
        self.state.read().advertised_name.clone()
    }

    /// Get the current bond state.
    pub fn bond_state(&self) -> BondState {
        self.state.read().bond_state
    }

    /// Get the current link state.
    pub fn link_state(&self) -> LinkState {
        self.state.read().link_state
    }

    /// Get the most recent signal strength.
    pub fn rssi(&self) -> Option<i16> {
        self.state.read().rssi
    }

    /// Fold a fresh advertisement into the record.
    pub(crate) fn observe(&self, advertisement: &Advertisement) {
        let mut state = self.state.write();
        if let Some(ref name) = advertisement.name {
            state.advertised_name = name.clone();
        }
        state.rssi = advertisement.rssi;
    }

    /// Set the bond state. Reserved for the bond coordinator.
    pub(crate) fn set_bond_state(&self, bond_state: BondState) {
        self.state.write().bond_state = bond_state;
    }

    /// Set the link state. Reserved for the link connector.
    pub(crate) fn set_link_state(&self, link_state: LinkState) {
        self.state.write().link_state = link_state;
    }

    /// Claim the link for a new attempt.
    ///
    /// Succeeds only from `Disconnected`, moving to `Connecting`; at most
    /// one connector attempt can hold a peer's link at a time.
    pub(crate) fn try_begin_link(&self) -> bool {
        let mut state = self.state.write();
        if state.link_state.is_active() {
            return false;
        }
        state.link_state = LinkState::Connecting;
        true
    }
}

impl std::fmt::Debug for PeerDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("PeerDevice")
            .field("address", &self.address)
            .field("advertised_name", &state.advertised_name)
            .field("bond_state", &state.bond_state)
            .field("link_state", &state.link_state)
            .finish()
    }
}

/// Address-keyed registry of peers discovered this session.
///
/// UI layers hold identity strings only, never device handles; records are
/// evicted only by explicit cleanup or shutdown.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Arc<PeerDevice>>>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an advertisement, creating the peer on first sight.
    ///
    /// Returns the record and whether it was newly created.
    pub fn observe(&self, advertisement: &Advertisement) -> (Arc<PeerDevice>, bool) {
        let mut devices = self.devices.write();
        match devices.get(&advertisement.address) {
            Some(peer) => {
                peer.observe(advertisement);
                (peer.clone(), false)
            }
            None => {
                let peer = Arc::new(PeerDevice::new(
                    advertisement.address.clone(),
                    advertisement.name.clone().unwrap_or_default(),
                ));
                peer.observe(advertisement);
                devices.insert(advertisement.address.clone(), peer.clone());
                (peer, true)
            }
        }
    }

    /// Look up a peer by address.
    pub fn get(&self, address: &str) -> Option<Arc<PeerDevice>> {
        self.devices.read().get(address).cloned()
    }

    /// Get the identity strings of all known peers.
    pub fn addresses(&self) -> Vec<String> {
        self.devices.read().keys().cloned().collect()
    }

    /// Get the number of known peers.
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Check whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Remove a single peer.
    pub fn evict(&self, address: &str) -> Option<Arc<PeerDevice>> {
        self.devices.write().remove(address)
    }

    /// Remove every peer.
    pub fn clear(&self) {
        self.devices.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advertisement(address: &str, name: &str) -> Advertisement {
        Advertisement {
            address: address.to_string(),
            name: Some(name.to_string()),
            rssi: Some(-60),
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(format!("{}", BondState::Bonded), "Bonded");
        assert_eq!(format!("{}", LinkState::WriteSent), "WriteSent");
    }

    #[test]
    fn test_peer_defaults() {
        let peer = PeerDevice::new("AA:BB:CC:DD:EE:FF", "Rocket Launcher");
        assert_eq!(peer.address(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(peer.bond_state(), BondState::None);
        assert_eq!(peer.link_state(), LinkState::Disconnected);
        assert_eq!(peer.rssi(), None);
    }

    #[test]
    fn test_try_begin_link_is_exclusive() {
        let peer = PeerDevice::new("AA", "Rocket Launcher");
        assert!(peer.try_begin_link());
        assert_eq!(peer.link_state(), LinkState::Connecting);
        // Second attempt is refused until the link returns to Disconnected.
        assert!(!peer.try_begin_link());

        peer.set_link_state(LinkState::Disconnected);
        assert!(peer.try_begin_link());
    }

    #[test]
    fn test_registry_observe_dedups_by_address() {
        let registry = DeviceRegistry::new();

        let (first, newly) = registry.observe(&advertisement("AA", "Rocket Launcher"));
        assert!(newly);

        let (second, newly) = registry.observe(&advertisement("AA", "Rocket Launcher"));
        assert!(!newly);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_observe_refreshes_attributes() {
        let registry = DeviceRegistry::new();
        let (peer, _) = registry.observe(&advertisement("AA", "Rocket Launcher"));

        let update = Advertisement {
            address: "AA".to_string(),
            name: Some("Rocket Launcher".to_string()),
            rssi: Some(-42),
        };
        registry.observe(&update);
        assert_eq!(peer.rssi(), Some(-42));
    }

    #[test]
    fn test_registry_evict_and_clear() {
        let registry = DeviceRegistry::new();
        registry.observe(&advertisement("AA", "Rocket Launcher"));
        registry.observe(&advertisement("BB", "Rocket Launcher"));
        assert_eq!(registry.len(), 2);

        assert!(registry.evict("AA").is_some());
        assert!(registry.evict("AA").is_none());
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.addresses().is_empty());
    }
}
