//! Advertisement source seam.
//!
//! Discovery input arrives as a stream of [`Advertisement`] records:
//! unordered, possibly duplicated, observable without a connection. The
//! production source wraps a btleplug adapter; tests feed the same event
//! channel from memory.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace};

use crate::error::{Error, Result};

/// One observed advertisement from a nearby peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Advertisement {
    /// Stable identity of the advertiser.
    pub address: String,
    /// Advertised local name, if the packet carried one.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

/// Event emitted by an advertisement source.
#[derive(Debug, Clone)]
pub enum AdvertisementEvent {
    /// A peripheral advertisement was observed.
    Report(Advertisement),
    /// The platform scan primitive reported an error code.
    Failed {
        /// The raw platform error code.
        code: i32,
    },
}

/// A platform discovery primitive.
///
/// `start`/`stop` toggle radio-level scanning; observations and failures
/// arrive on the subscription channel.
#[async_trait]
pub trait AdvertisementSource: Send + Sync {
    /// Begin emitting advertisements.
    async fn start(&self) -> Result<()>;

    /// Stop emitting advertisements. Idempotent.
    async fn stop(&self) -> Result<()>;

    /// Subscribe to advertisement events.
    fn subscribe(&self) -> broadcast::Receiver<AdvertisementEvent>;
}

/// Advertisement source backed by a btleplug adapter.
pub struct BtleAdvertisementSource {
    /// The BLE adapter to scan with.
    adapter: Adapter,
    /// Whether scanning is currently active.
    is_active: Arc<RwLock<bool>>,
    /// Channel for advertisement events.
    event_tx: broadcast::Sender<AdvertisementEvent>,
    /// Handle to the adapter event pump.
    pump_handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

impl BtleAdvertisementSource {
    /// Create a source on the first available Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a source on a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            adapter,
            is_active: Arc::new(RwLock::new(false)),
            event_tx,
            pump_handle: Arc::new(RwLock::new(None)),
        }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Convert a central event into an advertisement report.
    async fn pump_event(
        event: CentralEvent,
        adapter: &Adapter,
        event_tx: &broadcast::Sender<AdvertisementEvent>,
    ) {
        let id = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
            CentralEvent::DeviceConnected(id) => {
                debug!("Device connected: {:?}", id);
                return;
            }
            CentralEvent::DeviceDisconnected(id) => {
                debug!("Device disconnected: {:?}", id);
                return;
            }
            _ => return,
        };

        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return,
        };

        let report = Advertisement {
            address: id.to_string(),
            name: properties.local_name,
            rssi: properties.rssi,
        };

        trace!("Advertisement: {:?}", report);
        let _ = event_tx.send(AdvertisementEvent::Report(report));
    }
}

#[async_trait]
impl AdvertisementSource for BtleAdvertisementSource {
    async fn start(&self) -> Result<()> {
        if *self.is_active.read() {
            debug!("Source already active, ignoring start request");
            return Ok(());
        }

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;

        *self.is_active.write() = true;

        let adapter = self.adapter.clone();
        let is_active = self.is_active.clone();
        let event_tx = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    error!("Failed to get adapter events: {}", e);
                    return;
                }
            };

            while *is_active.read() {
                tokio::select! {
                    Some(event) = events.next() => {
                        Self::pump_event(event, &adapter, &event_tx).await;
                    }
                    _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {
                        if !*is_active.read() {
                            break;
                        }
                    }
                }
            }

            debug!("Advertisement pump ended");
        });

        *self.pump_handle.write() = Some(handle);

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !*self.is_active.read() {
            return Ok(());
        }

        *self.is_active.write() = false;

        self.adapter.stop_scan().await.map_err(Error::Bluetooth)?;

        let handle = self.pump_handle.write().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AdvertisementEvent> {
        self.event_tx.subscribe()
    }
}

impl Drop for BtleAdvertisementSource {
    fn drop(&mut self) {
        *self.is_active.write() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advertisement_clone() {
        let report = Advertisement {
            address: "AA:BB".to_string(),
            name: Some("Rocket Launcher".to_string()),
            rssi: Some(-55),
        };
        let cloned = report.clone();
        assert_eq!(report, cloned);
    }

    #[test]
    fn test_event_carries_code() {
        let event = AdvertisementEvent::Failed { code: 2 };
        match event {
            AdvertisementEvent::Failed { code } => assert_eq!(code, 2),
            _ => panic!("expected failure event"),
        }
    }
}
