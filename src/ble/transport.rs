//! GATT transport seam.
//!
//! A [`LaunchTransport`] is the connection-oriented primitive the link
//! connector drives: open, discover the service graph, write, close. The
//! handle is owned by exactly one attempt and must be released on every
//! exit path; `close` is idempotent. The production implementation wraps a
//! btleplug peripheral.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// The discovered service/characteristic layout of a connected peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceGraph {
    services: HashMap<Uuid, HashSet<Uuid>>,
}

impl ServiceGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a characteristic under its service.
    pub fn insert(&mut self, service: Uuid, characteristic: Uuid) {
        self.services
            .entry(service)
            .or_default()
            .insert(characteristic);
    }

    /// Check whether the peer exposes the service.
    pub fn has_service(&self, service: &Uuid) -> bool {
        self.services.contains_key(service)
    }

    /// Check whether the characteristic exists within the service.
    pub fn resolve(&self, service: &Uuid, characteristic: &Uuid) -> bool {
        self.services
            .get(service)
            .map(|chars| chars.contains(characteristic))
            .unwrap_or(false)
    }

    /// Get the number of discovered services.
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Check whether nothing was discovered.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Transport-level event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport connection came up.
    Connected,
    /// The transport connection went away (explicit or peer-initiated).
    Disconnected,
}

/// A connection-oriented GATT primitive for one peer.
#[async_trait]
pub trait LaunchTransport: Send + Sync {
    /// Establish the transport connection.
    async fn open(&self) -> Result<()>;

    /// Discover the peer's service/characteristic graph.
    async fn discover(&self) -> Result<ServiceGraph>;

    /// Write a payload to a characteristic, with response.
    async fn write(&self, service: &Uuid, characteristic: &Uuid, payload: &[u8]) -> Result<()>;

    /// Release the transport handle. Idempotent.
    async fn close(&self) -> Result<()>;

    /// Subscribe to transport events.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

/// Produces a transport handle for a discovered peer address.
#[async_trait]
pub trait LinkFactory: Send + Sync {
    /// Resolve the address to a fresh transport handle.
    async fn link(&self, address: &str) -> Result<Arc<dyn LaunchTransport>>;
}

/// Transport backed by a btleplug peripheral.
pub struct BtleTransport {
    /// The adapter, watched for disconnection events.
    adapter: Adapter,
    /// The peripheral handle.
    peripheral: Peripheral,
    /// Set once the handle has been released.
    closed: AtomicBool,
    /// Channel for transport events.
    event_tx: broadcast::Sender<TransportEvent>,
    /// Handle to the disconnect watcher task.
    watch_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl BtleTransport {
    /// Create a transport for a peripheral.
    pub fn new(adapter: Adapter, peripheral: Peripheral) -> Self {
        let (event_tx, _) = broadcast::channel(16);

        Self {
            adapter,
            peripheral,
            closed: AtomicBool::new(false),
            event_tx,
            watch_handle: RwLock::new(None),
        }
    }

    /// Watch adapter events and forward disconnections for our peripheral.
    fn start_disconnect_watcher(&self) {
        let adapter = self.adapter.clone();
        let id = self.peripheral.id();
        let event_tx = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    warn!("Failed to watch adapter events: {}", e);
                    return;
                }
            };

            while let Some(event) = events.next().await {
                match event {
                    CentralEvent::DeviceDisconnected(other) if other == id => {
                        debug!("Peripheral {:?} disconnected", other);
                        let _ = event_tx.send(TransportEvent::Disconnected);
                        break;
                    }
                    _ => {}
                }
            }
        });

        *self.watch_handle.write() = Some(handle);
    }
}

#[async_trait]
impl LaunchTransport for BtleTransport {
    async fn open(&self) -> Result<()> {
        self.peripheral
            .connect()
            .await
            .map_err(|e| Error::ConnectionFailed {
                reason: e.to_string(),
            })?;

        self.start_disconnect_watcher();
        let _ = self.event_tx.send(TransportEvent::Connected);

        info!("Connected to {:?}", self.peripheral.id());
        Ok(())
    }

    async fn discover(&self) -> Result<ServiceGraph> {
        self.peripheral
            .discover_services()
            .await
            .map_err(Error::Bluetooth)?;

        let mut graph = ServiceGraph::new();
        for service in self.peripheral.services() {
            for characteristic in service.characteristics {
                debug!(
                    "Found characteristic {} in service {}",
                    characteristic.uuid, service.uuid
                );
                graph.insert(service.uuid, characteristic.uuid);
            }
        }

        debug!("Discovered {} services", graph.service_count());
        Ok(graph)
    }

    async fn write(&self, service: &Uuid, characteristic: &Uuid, payload: &[u8]) -> Result<()> {
        let target = self
            .peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == *service)
            .ok_or_else(|| Error::ServiceNotFound {
                uuid: service.to_string(),
            })?
            .characteristics
            .into_iter()
            .find(|c| c.uuid == *characteristic)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: characteristic.to_string(),
            })?;

        self.peripheral
            .write(&target, payload, WriteType::WithResponse)
            .await
            .map_err(|e| Error::WriteFailed {
                reason: e.to_string(),
            })?;

        debug!("Wrote {} bytes to {}", payload.len(), characteristic);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(handle) = self.watch_handle.write().take() {
            handle.abort();
        }

        if let Err(e) = self.peripheral.disconnect().await {
            // The handle is considered released either way.
            warn!("Error while disconnecting: {}", e);
        }

        let _ = self.event_tx.send(TransportEvent::Disconnected);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.event_tx.subscribe()
    }
}

impl Drop for BtleTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.watch_handle.write().take() {
            handle.abort();
        }
    }
}

/// Link factory over a btleplug adapter.
pub struct BtleLinkFactory {
    adapter: Adapter,
}

impl BtleLinkFactory {
    /// Create a factory on an adapter.
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl LinkFactory for BtleLinkFactory {
    async fn link(&self, address: &str) -> Result<Arc<dyn LaunchTransport>> {
        let peripherals = self.adapter.peripherals().await.map_err(Error::Bluetooth)?;

        for peripheral in peripherals {
            if peripheral.id().to_string() == address
                || peripheral.address().to_string() == address
            {
                return Ok(Arc::new(BtleTransport::new(
                    self.adapter.clone(),
                    peripheral,
                )));
            }
        }

        Err(Error::PeerNotFound {
            address: address.to_string(),
        })
    }
}
