//! Launch controller composition.
//!
//! [`AppController`] owns the whole pipeline for the lifetime of a
//! session: capability gate → scan → bond → connect/write → countdown.
//! All collaborators are explicit fields with explicit teardown; the UI
//! sees observable snapshots and identity strings only.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::ble::advertising::AdvertisementSource;
use crate::ble::bonding::{BondCoordinator, BondEvent, BondOutcome, BondingBackend, PlatformBonding};
use crate::ble::connector::{LinkConnector, LinkEvent};
use crate::ble::scanner::{ScanEvent, ScanFilter, ScanSession};
use crate::ble::transport::{BtleLinkFactory, LinkFactory};
use crate::ble::BtleAdvertisementSource;
use crate::capability::{CapabilityGate, GrantedGate, BOND_CAPABILITIES, SCAN_CAPABILITIES};
use crate::config::{BondPolicy, CommandSpec, LaunchConfig};
use crate::countdown::{CountdownCoordinator, CountdownEvent};
use crate::device::{DeviceRegistry, PeerDevice};
use crate::error::{Error, Result};
use crate::feedback::{FeedbackSink, TracingFeedback};

/// Event emitted by the controller. Every terminal error surfaces as one
/// discrete `OperationFailed`; none blocks future independent operations.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// A discovery pass started.
    ScanStarted,
    /// The discovery pass ended (match, timeout, manual stop or failure).
    ScanStopped,
    /// A launch peripheral was observed for the first time.
    PeerDiscovered {
        /// The peer address.
        address: String,
    },
    /// The launch command was delivered.
    LaunchCommandSent {
        /// The peer address.
        address: String,
    },
    /// The countdown started.
    CountdownStarted {
        /// The initial remaining value.
        remaining: u32,
    },
    /// An operation terminated with an error.
    OperationFailed {
        /// Which stage failed.
        context: String,
        /// Why it failed.
        reason: String,
    },
}

/// Observable controller state for the UI collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControllerSnapshot {
    /// Whether a discovery pass is active.
    pub scanning: bool,
    /// Whether a countdown is running.
    pub countdown_running: bool,
    /// Remaining countdown seconds.
    pub remaining: u32,
    /// The LCD representation.
    pub display_text: String,
}

/// How a launch sequence against one peer resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// The command was delivered and the countdown started.
    Delivered,
    /// A bond attempt was already recorded for the peer; nothing was done.
    AlreadyAttempted,
}

/// The bond → connect → write → countdown sequence for one peer.
struct LaunchPipeline {
    gate: Arc<dyn CapabilityGate>,
    bonds: Arc<BondCoordinator>,
    connector: Arc<LinkConnector>,
    links: Arc<dyn LinkFactory>,
    countdown: Arc<CountdownCoordinator>,
    command: CommandSpec,
    event_tx: broadcast::Sender<ControllerEvent>,
}

impl LaunchPipeline {
    /// Run the sequence to its terminal outcome.
    ///
    /// Ordering: the bond outcome is observed before any connect is
    /// issued, and write success is observed before the countdown starts.
    async fn run(&self, peer: Arc<PeerDevice>) -> Result<LaunchOutcome> {
        let mut peer = peer;
        let mut resumed = false;

        loop {
            match self.bonds.ensure_bonded(&peer).await {
                Ok(BondOutcome::AlreadyAttempted) => {
                    info!("Bond already attempted for {}, skipping", peer.address());
                    return Ok(LaunchOutcome::AlreadyAttempted);
                }
                Ok(_) => break,
                Err(e) if e.is_capability_denied() && !resumed => {
                    // The coordinator cached the peer; ask for the grant
                    // and resume it rather than forcing rediscovery.
                    if self.gate.request_capability(BOND_CAPABILITIES).await {
                        match self.bonds.resume_pending() {
                            Some(pending) => {
                                resumed = true;
                                peer = pending;
                                continue;
                            }
                            None => return Err(e),
                        }
                    }
                    self.bonds.clear_pending();
                    self.fail("bonding", &e);
                    return Err(e);
                }
                Err(e) => {
                    self.fail("bonding", &e);
                    return Err(e);
                }
            }
        }

        let transport = match self.links.link(peer.address()).await {
            Ok(transport) => transport,
            Err(e) => {
                self.fail("connect", &e);
                return Err(e);
            }
        };

        match self.connector.deliver(&peer, transport, &self.command).await {
            Ok(()) => {
                let _ = self.event_tx.send(ControllerEvent::LaunchCommandSent {
                    address: peer.address().to_string(),
                });
                // Write success is the single countdown trigger.
                self.countdown.start();
                let _ = self.event_tx.send(ControllerEvent::CountdownStarted {
                    remaining: self.countdown.remaining(),
                });
                Ok(LaunchOutcome::Delivered)
            }
            Err(e) => {
                self.fail("command delivery", &e);
                Err(e)
            }
        }
    }

    fn fail(&self, context: &str, error: &Error) {
        warn!("{} failed: {}", context, error);
        let _ = self.event_tx.send(ControllerEvent::OperationFailed {
            context: context.to_string(),
            reason: error.to_string(),
        });
    }
}

/// Composes the launch pipeline and exposes observable state to the UI.
///
/// Must be created within a Tokio runtime.
pub struct AppController {
    config: LaunchConfig,
    gate: Arc<dyn CapabilityGate>,
    scan: Arc<ScanSession>,
    devices: Arc<DeviceRegistry>,
    bonds: Arc<BondCoordinator>,
    connector: Arc<LinkConnector>,
    countdown: Arc<CountdownCoordinator>,
    pipeline: Arc<LaunchPipeline>,
    event_tx: broadcast::Sender<ControllerEvent>,
    scan_task: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl AppController {
    /// Create a controller from explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the configuration is invalid.
    pub fn new(
        config: LaunchConfig,
        gate: Arc<dyn CapabilityGate>,
        source: Arc<dyn AdvertisementSource>,
        bonding: Arc<dyn BondingBackend>,
        links: Arc<dyn LinkFactory>,
        feedback: Arc<dyn FeedbackSink>,
    ) -> Result<Self> {
        config.validate()?;

        let scan = Arc::new(ScanSession::new(source));
        let devices = Arc::new(DeviceRegistry::new());
        let bonds = Arc::new(BondCoordinator::new(gate.clone(), bonding));
        let connector = Arc::new(LinkConnector::new(gate.clone()));
        let countdown = Arc::new(CountdownCoordinator::new(
            config.countdown_start,
            config.tick_period,
            feedback,
        ));
        countdown.settle_idle_display();

        let (event_tx, _) = broadcast::channel(64);

        let pipeline = Arc::new(LaunchPipeline {
            gate: gate.clone(),
            bonds: bonds.clone(),
            connector: connector.clone(),
            links,
            countdown: countdown.clone(),
            command: config.command.clone(),
            event_tx: event_tx.clone(),
        });

        Ok(Self {
            config,
            gate,
            scan,
            devices,
            bonds,
            connector,
            countdown,
            pipeline,
            event_tx,
            scan_task: RwLock::new(None),
        })
    }

    /// Create a controller on the production Bluetooth stack.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn bluetooth(config: LaunchConfig) -> Result<Self> {
        let source = Arc::new(BtleAdvertisementSource::new().await?);
        let links = Arc::new(BtleLinkFactory::new(source.adapter().clone()));

        Self::new(
            config,
            Arc::new(GrantedGate),
            source,
            Arc::new(PlatformBonding::new()),
            links,
            Arc::new(TracingFeedback),
        )
    }

    /// Get the configuration.
    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Get an observable snapshot for the UI.
    pub fn snapshot(&self) -> ControllerSnapshot {
        let countdown = self.countdown.snapshot();
        ControllerSnapshot {
            scanning: self.scan.is_scanning(),
            countdown_running: countdown.running,
            remaining: countdown.remaining,
            display_text: countdown.display,
        }
    }

    /// Check if a discovery pass is active.
    pub fn is_scanning(&self) -> bool {
        self.scan.is_scanning()
    }

    /// Get the identity strings of all discovered peers. The UI never
    /// holds device handles.
    pub fn peers(&self) -> Vec<String> {
        self.devices.addresses()
    }

    /// Subscribe to controller events.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribe to scan events.
    pub fn subscribe_scan(&self) -> broadcast::Receiver<ScanEvent> {
        self.scan.subscribe()
    }

    /// Subscribe to bond events.
    pub fn subscribe_bonds(&self) -> broadcast::Receiver<BondEvent> {
        self.bonds.subscribe()
    }

    /// Subscribe to link events.
    pub fn subscribe_links(&self) -> broadcast::Receiver<LinkEvent> {
        self.connector.subscribe()
    }

    /// Subscribe to countdown events.
    pub fn subscribe_countdown(&self) -> broadcast::Receiver<CountdownEvent> {
        self.countdown.subscribe()
    }

    /// Start a discovery pass for the configured target.
    ///
    /// A capability denial abandons the start, reports it, and clears any
    /// pending bond; no retry is scheduled. If a grant arrives while a
    /// bond was waiting on it, that peer is resumed instead of rescanning.
    /// A pass that times out without a match leaves the system idle until
    /// the caller invokes this again.
    ///
    /// # Errors
    ///
    /// [`Error::CapabilityDenied`] on denial; otherwise the scan
    /// session's error.
    pub async fn start_scan(&self) -> Result<()> {
        if !self.gate.has_capability(SCAN_CAPABILITIES) {
            if !self.gate.request_capability(SCAN_CAPABILITIES).await {
                self.bonds.clear_pending();
                let err = Error::CapabilityDenied {
                    needed: SCAN_CAPABILITIES.to_vec(),
                };
                let _ = self.event_tx.send(ControllerEvent::OperationFailed {
                    context: "scan".to_string(),
                    reason: err.to_string(),
                });
                return Err(err);
            }

            if let Some(peer) = self.bonds.resume_pending() {
                info!("Capability granted, resuming pending peer {}", peer.address());
                let pipeline = self.pipeline.clone();
                tokio::spawn(async move {
                    let _ = pipeline.run(peer).await;
                });
                return Ok(());
            }
        }

        self.begin_scan().await
    }

    async fn begin_scan(&self) -> Result<()> {
        // Subscribe before starting so no match can slip past the loop.
        let mut rx = self.scan.subscribe();

        let filter = ScanFilter::new(self.config.target_name.clone(), self.config.scan_window);
        self.scan.start(filter, self.config.scan_mode).await?;
        let _ = self.event_tx.send(ControllerEvent::ScanStarted);

        let devices = self.devices.clone();
        let pipeline = self.pipeline.clone();
        let event_tx = self.event_tx.clone();
        let policy = self.config.bond_policy;

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ScanEvent::Match(report)) => {
                        let (peer, newly) = devices.observe(&report);
                        if newly {
                            info!("Discovered launch peripheral {}", peer.address());
                            let _ = event_tx.send(ControllerEvent::PeerDiscovered {
                                address: peer.address().to_string(),
                            });
                        }
                        if policy == BondPolicy::Auto {
                            // Sequences are serialized on this loop.
                            let _ = pipeline.run(peer).await;
                        }
                    }
                    Ok(ScanEvent::Failed { code }) => {
                        let _ = event_tx.send(ControllerEvent::OperationFailed {
                            context: "scan".to_string(),
                            reason: format!("platform error code {}", code),
                        });
                    }
                    Ok(ScanEvent::Stopped { .. }) => {
                        let _ = event_tx.send(ControllerEvent::ScanStopped);
                        break;
                    }
                    Ok(ScanEvent::Started) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Controller lagged {} scan events", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Match loop ended");
        });

        *self.scan_task.write() = Some(handle);

        Ok(())
    }

    /// Stop the active discovery pass. A no-op when not scanning.
    pub async fn stop_scan(&self) -> Result<()> {
        self.scan.stop().await
    }

    /// Run the launch sequence against a discovered peer.
    ///
    /// The manual-policy counterpart of automatic bonding: the UI hands
    /// back an identity string from [`AppController::peers`].
    ///
    /// # Errors
    ///
    /// [`Error::PeerNotFound`] for unknown addresses; otherwise the
    /// sequence's terminal error.
    pub async fn select_peer(&self, address: &str) -> Result<LaunchOutcome> {
        let peer = self.devices.get(address).ok_or_else(|| Error::PeerNotFound {
            address: address.to_string(),
        })?;
        self.pipeline.run(peer).await
    }

    /// Cancel a running countdown. Returns `false` when none is running.
    pub fn cancel_countdown(&self) -> bool {
        self.countdown.cancel()
    }

    /// Make every peer eligible for a fresh bond attempt.
    pub fn reset_attempts(&self) {
        self.bonds.registry().reset();
    }

    /// Make one peer eligible for a fresh bond attempt.
    pub fn reset_attempt(&self, address: &str) {
        self.bonds.registry().reset_peer(address);
    }

    /// Clean shutdown: stop scanning, cancel any countdown, evict peers.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down launch controller");

        self.scan.stop().await?;
        self.countdown.cancel();

        if let Some(handle) = self.scan_task.write().take() {
            handle.abort();
        }

        self.devices.clear();
        Ok(())
    }
}

impl Drop for AppController {
    fn drop(&mut self) {
        if let Some(handle) = self.scan_task.write().take() {
            handle.abort();
        }
    }
}
