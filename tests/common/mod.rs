//! In-memory fakes of the platform seams, shared by the scenario tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use redbutton_ble::ble::uuids::{LAUNCH_COMMAND_UUID, LAUNCH_SERVICE_UUID};
use redbutton_ble::{
    Advertisement, AdvertisementEvent, AdvertisementSource, BondResult, BondUpdate,
    BondingBackend, FeedbackSink, LaunchTransport, LinkFactory, Result, ServiceGraph,
    TransportEvent,
};

/// Advertisement source fed from the test body.
pub struct FakeSource {
    event_tx: broadcast::Sender<AdvertisementEvent>,
    pub starts: AtomicU32,
    pub stops: AtomicU32,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            event_tx,
            starts: AtomicU32::new(0),
            stops: AtomicU32::new(0),
        })
    }

    pub fn report(&self, address: &str, name: &str) {
        let _ = self
            .event_tx
            .send(AdvertisementEvent::Report(Advertisement {
                address: address.to_string(),
                name: Some(name.to_string()),
                rssi: Some(-48),
            }));
    }

    pub fn fail(&self, code: i32) {
        let _ = self.event_tx.send(AdvertisementEvent::Failed { code });
    }
}

#[async_trait]
impl AdvertisementSource for FakeSource {
    async fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AdvertisementEvent> {
        self.event_tx.subscribe()
    }
}

/// Bonding backend answering every request with a scripted outcome.
pub struct FakeBonding {
    event_tx: broadcast::Sender<BondUpdate>,
    outcome: BondResult,
    pub requests: AtomicU32,
}

impl FakeBonding {
    pub fn bonding(outcome: BondResult) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            event_tx,
            outcome,
            requests: AtomicU32::new(0),
        })
    }

    pub fn accepting() -> Arc<Self> {
        Self::bonding(BondResult::Bonded)
    }

    pub fn rejecting() -> Arc<Self> {
        Self::bonding(BondResult::Failed)
    }
}

#[async_trait]
impl BondingBackend for FakeBonding {
    async fn request_bond(&self, address: &str) -> Result<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let _ = self.event_tx.send(BondUpdate {
            address: address.to_string(),
            outcome: self.outcome,
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BondUpdate> {
        self.event_tx.subscribe()
    }
}

/// Scripted GATT transport.
pub struct FakeTransport {
    graph: ServiceGraph,
    hang_discover: bool,
    fail_write: bool,
    pub opens: AtomicU32,
    pub writes: AtomicU32,
    pub closes: AtomicU32,
    pub written: RwLock<Vec<(Uuid, Uuid, Vec<u8>)>>,
    event_tx: broadcast::Sender<TransportEvent>,
}

impl FakeTransport {
    pub fn launch_graph() -> ServiceGraph {
        let mut graph = ServiceGraph::new();
        graph.insert(LAUNCH_SERVICE_UUID, LAUNCH_COMMAND_UUID);
        graph
    }

    pub fn working() -> Arc<Self> {
        Self::build(Self::launch_graph(), false, false)
    }

    pub fn without_characteristic() -> Arc<Self> {
        let mut graph = ServiceGraph::new();
        graph.insert(LAUNCH_SERVICE_UUID, Uuid::from_u128(0xfeed));
        Self::build(graph, false, false)
    }

    pub fn hanging_discovery() -> Arc<Self> {
        Self::build(Self::launch_graph(), true, false)
    }

    pub fn rejecting_writes() -> Arc<Self> {
        Self::build(Self::launch_graph(), false, true)
    }

    fn build(graph: ServiceGraph, hang_discover: bool, fail_write: bool) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            graph,
            hang_discover,
            fail_write,
            opens: AtomicU32::new(0),
            writes: AtomicU32::new(0),
            closes: AtomicU32::new(0),
            written: RwLock::new(Vec::new()),
            event_tx,
        })
    }

    pub fn disconnect(&self) {
        let _ = self.event_tx.send(TransportEvent::Disconnected);
    }
}

#[async_trait]
impl LaunchTransport for FakeTransport {
    async fn open(&self) -> Result<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn discover(&self) -> Result<ServiceGraph> {
        if self.hang_discover {
            futures::future::pending::<()>().await;
        }
        Ok(self.graph.clone())
    }

    async fn write(&self, service: &Uuid, characteristic: &Uuid, payload: &[u8]) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_write {
            return Err(redbutton_ble::Error::WriteFailed {
                reason: "rejected by peer".to_string(),
            });
        }
        self.written
            .write()
            .push((*service, *characteristic, payload.to_vec()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.event_tx.subscribe()
    }
}

/// Factory handing out one scripted transport for every address.
pub struct FakeLinks {
    transport: Arc<FakeTransport>,
    pub links: AtomicU32,
}

impl FakeLinks {
    pub fn with(transport: Arc<FakeTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            links: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl LinkFactory for FakeLinks {
    async fn link(&self, _address: &str) -> Result<Arc<dyn LaunchTransport>> {
        self.links.fetch_add(1, Ordering::SeqCst);
        Ok(self.transport.clone())
    }
}

/// Feedback sink that counts cues.
pub struct CountingFeedback {
    pub ticks: AtomicU32,
    pub terminals: AtomicU32,
}

impl CountingFeedback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ticks: AtomicU32::new(0),
            terminals: AtomicU32::new(0),
        })
    }
}

impl FeedbackSink for CountingFeedback {
    fn play_tick(&self) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }

    fn vibrate_terminal(&self) {
        self.terminals.fetch_add(1, Ordering::SeqCst);
    }
}
