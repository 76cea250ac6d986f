//! Bonding coordination.
//!
//! Bonding establishes the trusted, platform-persisted relationship with a
//! peer, independent of any single connection. Attempts are recorded in an
//! [`AttemptRegistry`] so that a peer is asked to bond at most once per
//! session; the registry is cleared only by explicit reset, never
//! implicitly.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::capability::{CapabilityGate, BOND_CAPABILITIES};
use crate::device::{BondState, PeerDevice};
use crate::error::{Error, Result};

/// Terminal outcome of a platform bond attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondResult {
    /// The peer is now bonded.
    Bonded,
    /// The platform rejected the bond.
    Failed,
    /// The pairing dialog was dismissed.
    Cancelled,
}

/// Out-of-band bond outcome, keyed by peer address.
///
/// Updates may arrive for addresses with no in-flight attempt; those are
/// ignored.
#[derive(Debug, Clone)]
pub struct BondUpdate {
    /// Address of the peer the outcome is for.
    pub address: String,
    /// The terminal outcome.
    pub outcome: BondResult,
}

/// A platform bonding primitive.
#[async_trait]
pub trait BondingBackend: Send + Sync {
    /// Issue one bond request for the address.
    async fn request_bond(&self, address: &str) -> Result<()>;

    /// Subscribe to bond outcomes.
    fn subscribe(&self) -> broadcast::Receiver<BondUpdate>;
}

/// Backend for platforms where pairing rides on the connection.
///
/// btleplug exposes no explicit pairing verb; the OS runs its pairing flow
/// when an encrypted characteristic is first touched. This backend
/// therefore resolves every request as bonded and leaves the real exchange
/// to the platform.
pub struct PlatformBonding {
    event_tx: broadcast::Sender<BondUpdate>,
}

impl PlatformBonding {
    /// Create the backend.
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(16);
        Self { event_tx }
    }
}

impl Default for PlatformBonding {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BondingBackend for PlatformBonding {
    async fn request_bond(&self, address: &str) -> Result<()> {
        debug!("Delegating bond for {} to the platform", address);
        let _ = self.event_tx.send(BondUpdate {
            address: address.to_string(),
            outcome: BondResult::Bonded,
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BondUpdate> {
        self.event_tx.subscribe()
    }
}

/// Set of peer addresses with a bond/connect attempt already initiated this
/// session.
#[derive(Default)]
pub struct AttemptRegistry {
    attempted: RwLock<HashSet<String>>,
}

impl AttemptRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attempt. Returns `false` if one was already recorded.
    pub fn record(&self, address: &str) -> bool {
        self.attempted.write().insert(address.to_string())
    }

    /// Check whether an attempt is recorded for the address.
    pub fn contains(&self, address: &str) -> bool {
        self.attempted.read().contains(address)
    }

    /// Forget the attempt for one peer, making it eligible again.
    pub fn reset_peer(&self, address: &str) {
        self.attempted.write().remove(address);
    }

    /// Forget every recorded attempt.
    pub fn reset(&self) {
        self.attempted.write().clear();
    }

    /// Get the number of recorded attempts.
    pub fn len(&self) -> usize {
        self.attempted.read().len()
    }

    /// Check whether no attempt is recorded.
    pub fn is_empty(&self) -> bool {
        self.attempted.read().is_empty()
    }
}

/// How `ensure_bonded` resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondOutcome {
    /// The peer was already bonded; nothing was issued.
    AlreadyBonded,
    /// An attempt for this peer was already recorded; nothing was issued.
    AlreadyAttempted,
    /// A fresh attempt ran and the peer is now bonded.
    Bonded,
}

/// Event emitted by the coordinator, once per attempt stage.
#[derive(Debug, Clone)]
pub enum BondEvent {
    /// A bond request was issued for the address.
    Requested {
        /// The peer address.
        address: String,
    },
    /// The attempt completed and the peer is bonded.
    Bonded {
        /// The peer address.
        address: String,
    },
    /// The attempt failed.
    Failed {
        /// The peer address.
        address: String,
        /// Why the attempt failed.
        reason: String,
    },
}

/// Ensures a trusted pairing exists for a peer, at most once per session.
pub struct BondCoordinator {
    /// Capability gate consulted before any platform request.
    gate: Arc<dyn CapabilityGate>,
    /// The platform bonding primitive.
    backend: Arc<dyn BondingBackend>,
    /// Addresses already attempted this session.
    registry: AttemptRegistry,
    /// Peer cached when a bond was abandoned on a capability denial, so a
    /// later grant can resume it instead of forcing rediscovery.
    pending: RwLock<Option<Arc<PeerDevice>>>,
    /// Channel for bond events.
    event_tx: broadcast::Sender<BondEvent>,
}

impl BondCoordinator {
    /// Create a coordinator.
    pub fn new(gate: Arc<dyn CapabilityGate>, backend: Arc<dyn BondingBackend>) -> Self {
        let (event_tx, _) = broadcast::channel(32);

        Self {
            gate,
            backend,
            registry: AttemptRegistry::new(),
            pending: RwLock::new(None),
            event_tx,
        }
    }

    /// Subscribe to bond events.
    pub fn subscribe(&self) -> broadcast::Receiver<BondEvent> {
        self.event_tx.subscribe()
    }

    /// Access the attempt registry.
    pub fn registry(&self) -> &AttemptRegistry {
        &self.registry
    }

    /// Take the peer cached by a capability denial, if any.
    pub fn resume_pending(&self) -> Option<Arc<PeerDevice>> {
        self.pending.write().take()
    }

    /// Drop any cached pending peer.
    pub fn clear_pending(&self) {
        *self.pending.write() = None;
    }

    /// Ensure a trusted pairing exists for the peer.
    ///
    /// Bonded peers return immediately. A recorded attempt is skipped
    /// without a second platform request. Otherwise exactly one bond
    /// request is issued and its out-of-band outcome awaited; there is no
    /// timeout and no automatic retry — a failed bond needs a fresh call
    /// after [`AttemptRegistry::reset_peer`].
    ///
    /// # Errors
    ///
    /// [`Error::CapabilityDenied`] if bonding capability is missing (the
    /// peer is cached for resumption), [`Error::BondFailed`] on a
    /// rejected or cancelled attempt.
    pub async fn ensure_bonded(&self, peer: &Arc<PeerDevice>) -> Result<BondOutcome> {
        let address = peer.address().to_string();

        if peer.bond_state().is_bonded() {
            debug!("Peer {} already bonded", address);
            return Ok(BondOutcome::AlreadyBonded);
        }

        if !self.gate.has_capability(BOND_CAPABILITIES) {
            info!("Bond capability missing, caching {} as pending", address);
            *self.pending.write() = Some(peer.clone());
            return Err(Error::CapabilityDenied {
                needed: BOND_CAPABILITIES.to_vec(),
            });
        }

        if !self.registry.record(&address) {
            info!("Bond already attempted for {}", address);
            return Ok(BondOutcome::AlreadyAttempted);
        }

        // Subscribe before requesting so the outcome cannot be missed.
        let mut rx = self.backend.subscribe();

        peer.set_bond_state(BondState::Bonding);
        let _ = self.event_tx.send(BondEvent::Requested {
            address: address.clone(),
        });

        info!("Requesting bond for {}", address);
        if let Err(e) = self.backend.request_bond(&address).await {
            peer.set_bond_state(BondState::None);
            let reason = e.to_string();
            let _ = self.event_tx.send(BondEvent::Failed {
                address: address.clone(),
                reason: reason.clone(),
            });
            return Err(Error::BondFailed { address, reason });
        }

        loop {
            match rx.recv().await {
                Ok(update) if update.address == address => match update.outcome {
                    BondResult::Bonded => {
                        peer.set_bond_state(BondState::Bonded);
                        info!("Peer {} bonded", address);
                        let _ = self.event_tx.send(BondEvent::Bonded {
                            address: address.clone(),
                        });
                        return Ok(BondOutcome::Bonded);
                    }
                    BondResult::Failed | BondResult::Cancelled => {
                        peer.set_bond_state(BondState::None);
                        let reason = match update.outcome {
                            BondResult::Cancelled => "pairing cancelled".to_string(),
                            _ => "pairing rejected".to_string(),
                        };
                        warn!("Bond attempt for {} failed: {}", address, reason);
                        let _ = self.event_tx.send(BondEvent::Failed {
                            address: address.clone(),
                            reason: reason.clone(),
                        });
                        return Err(Error::BondFailed { address, reason });
                    }
                },
                // Outcome for a peer we are not tracking.
                Ok(other) => {
                    debug!("Ignoring bond update for untracked {}", other.address);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Bond update stream lagged by {} events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    peer.set_bond_state(BondState::None);
                    return Err(Error::Internal(
                        "bonding backend closed before delivering an outcome".to_string(),
                    ));
                }
            }
        }
    }
}
