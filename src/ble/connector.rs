//! Command delivery over a fresh transport connection.
//!
//! One [`LinkConnector::deliver`] call is one attempt: connect, discover,
//! resolve the command characteristic, write the payload once, release the
//! handle. The outcome is reported exactly once; a disconnection racing
//! any step before write completion fails the attempt.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::ble::transport::{LaunchTransport, TransportEvent};
use crate::capability::{CapabilityGate, CONNECT_CAPABILITIES};
use crate::config::CommandSpec;
use crate::device::{LinkState, PeerDevice};
use crate::error::{Error, Result};

/// Event emitted by the connector.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// The peer's link state changed.
    StateChanged {
        /// The peer address.
        address: String,
        /// The new link state.
        state: LinkState,
    },
    /// The command write completed. The single countdown trigger.
    CommandDelivered {
        /// The peer address.
        address: String,
    },
    /// The attempt terminated without delivering the command.
    AttemptFailed {
        /// The peer address.
        address: String,
        /// Why the attempt failed.
        reason: String,
    },
}

/// Drives the per-attempt link state machine:
/// `Disconnected → Connecting → Connected → Discovering → Ready →
/// WriteSent → Done`, with any failure routing through `Closing` back to
/// `Disconnected`.
pub struct LinkConnector {
    /// Capability gate, consulted before the transport is touched.
    gate: Arc<dyn CapabilityGate>,
    /// Channel for link events.
    event_tx: broadcast::Sender<LinkEvent>,
}

impl LinkConnector {
    /// Create a connector.
    pub fn new(gate: Arc<dyn CapabilityGate>) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self { gate, event_tx }
    }

    /// Subscribe to link events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.event_tx.subscribe()
    }

    /// Connect to the peer and deliver the command.
    ///
    /// Fails fast with [`Error::CapabilityDenied`] if the connect
    /// capability is absent (the transport is never touched). At most one
    /// attempt can hold a peer's link; a concurrent call is refused. The
    /// transport handle is released on every exit path, exactly once.
    ///
    /// # Errors
    ///
    /// Any step failing terminates the attempt: [`Error::ConnectionFailed`]
    /// (including a racing disconnection), [`Error::ServiceNotFound`],
    /// [`Error::CharacteristicNotFound`], [`Error::WriteFailed`]. Nothing
    /// is retried.
    pub async fn deliver(
        &self,
        peer: &Arc<PeerDevice>,
        transport: Arc<dyn LaunchTransport>,
        command: &CommandSpec,
    ) -> Result<()> {
        if !self.gate.has_capability(CONNECT_CAPABILITIES) {
            return Err(Error::CapabilityDenied {
                needed: CONNECT_CAPABILITIES.to_vec(),
            });
        }

        if !peer.try_begin_link() {
            return Err(Error::ConnectionFailed {
                reason: "connection attempt already in progress".to_string(),
            });
        }
        self.announce(peer, LinkState::Connecting);

        let mut events = transport.subscribe();
        let result = self.run_attempt(peer, &transport, command, &mut events).await;

        // Release the handle on every exit path.
        self.set_state(peer, LinkState::Closing);
        if let Err(e) = transport.close().await {
            warn!("Failed to close transport for {}: {}", peer.address(), e);
        }
        self.set_state(peer, LinkState::Disconnected);

        match &result {
            Ok(()) => {
                info!("Command delivered to {}", peer.address());
                let _ = self.event_tx.send(LinkEvent::CommandDelivered {
                    address: peer.address().to_string(),
                });
            }
            Err(e) => {
                warn!("Attempt against {} failed: {}", peer.address(), e);
                let _ = self.event_tx.send(LinkEvent::AttemptFailed {
                    address: peer.address().to_string(),
                    reason: e.to_string(),
                });
            }
        }

        result
    }

    /// The connect → discover → write sequence, racing disconnection.
    async fn run_attempt(
        &self,
        peer: &Arc<PeerDevice>,
        transport: &Arc<dyn LaunchTransport>,
        command: &CommandSpec,
        events: &mut broadcast::Receiver<TransportEvent>,
    ) -> Result<()> {
        race_disconnect(events, transport.open()).await?;
        self.set_state(peer, LinkState::Connected);

        // Discovery starts immediately; there is no manual trigger.
        self.set_state(peer, LinkState::Discovering);
        let graph = race_disconnect(events, transport.discover()).await?;

        if !graph.has_service(&command.service) {
            return Err(Error::ServiceNotFound {
                uuid: command.service.to_string(),
            });
        }
        if !graph.resolve(&command.service, &command.characteristic) {
            return Err(Error::CharacteristicNotFound {
                uuid: command.characteristic.to_string(),
            });
        }
        self.set_state(peer, LinkState::Ready);

        // Exactly one write of the fixed payload.
        self.set_state(peer, LinkState::WriteSent);
        race_disconnect(
            events,
            transport.write(&command.service, &command.characteristic, &command.payload),
        )
        .await?;

        self.set_state(peer, LinkState::Done);
        Ok(())
    }

    /// Update the peer's link state and emit the change.
    fn set_state(&self, peer: &Arc<PeerDevice>, state: LinkState) {
        peer.set_link_state(state);
        self.announce(peer, state);
    }

    fn announce(&self, peer: &Arc<PeerDevice>, state: LinkState) {
        debug!("Link {} -> {}", peer.address(), state);
        let _ = self.event_tx.send(LinkEvent::StateChanged {
            address: peer.address().to_string(),
            state,
        });
    }
}

/// Await an operation while watching for a transport disconnection.
///
/// A disconnection before the operation resolves fails the attempt; it is
/// never treated as partial success.
async fn race_disconnect<T>(
    events: &mut broadcast::Receiver<TransportEvent>,
    operation: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::pin!(operation);

    loop {
        tokio::select! {
            // A completed operation wins over a simultaneous disconnect;
            // only a disconnection before completion fails the attempt.
            biased;
            result = &mut operation => return result,
            event = events.recv() => match event {
                Ok(TransportEvent::Disconnected) => {
                    return Err(Error::ConnectionFailed {
                        reason: "peer disconnected before command delivery".to_string(),
                    });
                }
                Ok(TransportEvent::Connected) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Transport event stream lagged by {} events", missed);
                }
                // Event channel gone: nothing left to race against.
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    operation.await
}
