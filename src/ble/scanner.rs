//! Name-filtered discovery passes.
//!
//! A [`ScanSession`] owns one bounded discovery pass at a time: it starts
//! the advertisement source, accepts advertisements whose name equals the
//! filter target exactly, and stops on the first match (single-shot), on
//! window expiry, or on an explicit [`ScanSession::stop`].

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::ble::advertising::{Advertisement, AdvertisementEvent, AdvertisementSource};
use crate::config::ScanMode;
use crate::error::{Error, Result};

/// Immutable parameters of one discovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanFilter {
    /// Advertised name a peripheral must match exactly (case-sensitive).
    pub target_name: String,
    /// Hard stop for the pass. Must be non-zero.
    pub window: Duration,
}

impl ScanFilter {
    /// Create a filter.
    pub fn new(target_name: impl Into<String>, window: Duration) -> Self {
        Self {
            target_name: target_name.into(),
            window,
        }
    }
}

/// Why a scan pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Single-shot pass accepted a match.
    Matched,
    /// The window elapsed without a terminating match.
    TimedOut,
    /// [`ScanSession::stop`] was called.
    Manual,
    /// The platform scan primitive failed.
    Failed,
}

/// Event emitted by a scan session.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// A pass started.
    Started,
    /// An advertisement matched the filter.
    Match(Advertisement),
    /// The platform scan primitive reported an error code.
    Failed {
        /// The raw platform error code.
        code: i32,
    },
    /// The pass ended. No match is reported after this.
    Stopped {
        /// Why the pass ended.
        reason: StopReason,
    },
}

/// Owns a single bounded discovery pass over an advertisement source.
pub struct ScanSession {
    /// The discovery primitive.
    source: Arc<dyn AdvertisementSource>,
    /// Whether a pass is currently active. Consumed by UI to disable the
    /// start control.
    is_scanning: Arc<RwLock<bool>>,
    /// Channel for scan events.
    event_tx: broadcast::Sender<ScanEvent>,
    /// Handle to the pass task.
    scan_handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

impl ScanSession {
    /// Create a session over an advertisement source.
    pub fn new(source: Arc<dyn AdvertisementSource>) -> Self {
        let (event_tx, _) = broadcast::channel(64);

        Self {
            source,
            is_scanning: Arc::new(RwLock::new(false)),
            event_tx,
            scan_handle: Arc::new(RwLock::new(None)),
        }
    }

    /// Check if a pass is currently active.
    pub fn is_scanning(&self) -> bool {
        *self.is_scanning.read()
    }

    /// Subscribe to scan events.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.event_tx.subscribe()
    }

    /// Begin a discovery pass.
    ///
    /// A no-op if a pass is already active. The pass auto-stops after
    /// `filter.window` elapses, or immediately after the first accepted
    /// match in [`ScanMode::SingleShot`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for a zero window, or the
    /// source's error if the platform scan cannot start.
    pub async fn start(&self, filter: ScanFilter, mode: ScanMode) -> Result<()> {
        if filter.window.is_zero() {
            return Err(Error::InvalidParameter {
                name: "filter.window".to_string(),
                value: "0".to_string(),
            });
        }

        if *self.is_scanning.read() {
            debug!("Already scanning, ignoring start request");
            return Ok(());
        }

        info!(
            "Starting scan for \"{}\" ({:?}, window {:?})",
            filter.target_name, mode, filter.window
        );

        // Subscribe before starting the source so no report is missed.
        let mut rx = self.source.subscribe();
        self.source.start().await?;

        *self.is_scanning.write() = true;
        let _ = self.event_tx.send(ScanEvent::Started);

        let source = self.source.clone();
        let is_scanning = self.is_scanning.clone();
        let event_tx = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            let deadline = tokio::time::sleep(filter.window);
            tokio::pin!(deadline);

            let reason = loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Ok(AdvertisementEvent::Report(report)) => {
                            if report.name.as_deref() == Some(filter.target_name.as_str()) {
                                debug!("Accepted advertisement from {}", report.address);
                                let _ = event_tx.send(ScanEvent::Match(report));
                                if mode == ScanMode::SingleShot {
                                    break StopReason::Matched;
                                }
                            }
                        }
                        Ok(AdvertisementEvent::Failed { code }) => {
                            warn!("Platform scan failed with code {}", code);
                            let _ = event_tx.send(ScanEvent::Failed { code });
                            break StopReason::Failed;
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("Advertisement stream lagged by {} events", missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            // Source went away underneath the pass.
                            break StopReason::Failed;
                        }
                    },
                    _ = &mut deadline => break StopReason::TimedOut,
                }
            };

            *is_scanning.write() = false;
            if let Err(e) = source.stop().await {
                warn!("Failed to stop advertisement source: {}", e);
            }
            let _ = event_tx.send(ScanEvent::Stopped { reason });
            debug!("Scan pass ended: {:?}", reason);
        });

        *self.scan_handle.write() = Some(handle);

        Ok(())
    }

    /// Stop the active pass. Calling this when not scanning is a no-op.
    pub async fn stop(&self) -> Result<()> {
        if !*self.is_scanning.read() {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        info!("Stopping scan");

        *self.is_scanning.write() = false;

        if let Some(handle) = self.scan_handle.write().take() {
            handle.abort();
        }

        self.source.stop().await?;
        let _ = self.event_tx.send(ScanEvent::Stopped {
            reason: StopReason::Manual,
        });

        Ok(())
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        *self.is_scanning.write() = false;
        if let Some(handle) = self.scan_handle.write().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeSource {
        event_tx: broadcast::Sender<AdvertisementEvent>,
        starts: AtomicU32,
        stops: AtomicU32,
    }

    impl FakeSource {
        fn new() -> Arc<Self> {
            let (event_tx, _) = broadcast::channel(64);
            Arc::new(Self {
                event_tx,
                starts: AtomicU32::new(0),
                stops: AtomicU32::new(0),
            })
        }

        fn report(&self, address: &str, name: &str) {
            let _ = self
                .event_tx
                .send(AdvertisementEvent::Report(Advertisement {
                    address: address.to_string(),
                    name: Some(name.to_string()),
                    rssi: Some(-50),
                }));
        }

        fn fail(&self, code: i32) {
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

    async fn next_event(rx: &mut broadcast::Receiver<ScanEvent>) -> ScanEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for scan event")
            .expect("scan event channel closed")
    }

    fn filter(window_ms: u64) -> ScanFilter {
        ScanFilter::new("Rocket Launcher", Duration::from_millis(window_ms))
    }

    #[tokio::test]
    async fn test_rejects_zero_window() {
        let session = ScanSession::new(FakeSource::new());
        let result = session
            .start(ScanFilter::new("Rocket Launcher", Duration::ZERO), ScanMode::SingleShot)
            .await;
        assert!(matches!(result, Err(Error::InvalidParameter { .. })));
        assert!(!session.is_scanning());
    }

    #[tokio::test]
    async fn test_times_out_without_match() {
        let source = FakeSource::new();
        let session = ScanSession::new(source.clone());
        let mut rx = session.subscribe();

        session.start(filter(60), ScanMode::SingleShot).await.unwrap();
        assert!(session.is_scanning());
        assert!(matches!(next_event(&mut rx).await, ScanEvent::Started));

        assert!(matches!(
            next_event(&mut rx).await,
            ScanEvent::Stopped {
                reason: StopReason::TimedOut
            }
        ));
        assert!(!session.is_scanning());
        assert_eq!(source.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_shot_stops_on_first_match() {
        let source = FakeSource::new();
        let session = ScanSession::new(source.clone());
        let mut rx = session.subscribe();

        session.start(filter(1_000), ScanMode::SingleShot).await.unwrap();
        assert!(matches!(next_event(&mut rx).await, ScanEvent::Started));

        source.report("AA:BB", "Rocket Launcher");

        match next_event(&mut rx).await {
            ScanEvent::Match(report) => assert_eq!(report.address, "AA:BB"),
            other => panic!("expected match, got {:?}", other),
        }
        assert!(matches!(
            next_event(&mut rx).await,
            ScanEvent::Stopped {
                reason: StopReason::Matched
            }
        ));
        assert!(!session.is_scanning());

        // The pass is over; later reports are never surfaced.
        source.report("CC:DD", "Rocket Launcher");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_name_match_is_exact_and_case_sensitive() {
        let source = FakeSource::new();
        let session = ScanSession::new(source.clone());
        let mut rx = session.subscribe();

        session.start(filter(60), ScanMode::SingleShot).await.unwrap();
        assert!(matches!(next_event(&mut rx).await, ScanEvent::Started));

        source.report("AA", "rocket launcher");
        source.report("BB", "Rocket Launcher 2");
        source.report("CC", "Rocket");

        // None of those match; the pass runs to the window.
        assert!(matches!(
            next_event(&mut rx).await,
            ScanEvent::Stopped {
                reason: StopReason::TimedOut
            }
        ));
    }

    #[tokio::test]
    async fn test_continuous_mode_reports_every_match() {
        let source = FakeSource::new();
        let session = ScanSession::new(source.clone());
        let mut rx = session.subscribe();

        session.start(filter(120), ScanMode::Continuous).await.unwrap();
        assert!(matches!(next_event(&mut rx).await, ScanEvent::Started));

        source.report("AA", "Rocket Launcher");
        source.report("AA", "Rocket Launcher");

        assert!(matches!(next_event(&mut rx).await, ScanEvent::Match(_)));
        assert!(matches!(next_event(&mut rx).await, ScanEvent::Match(_)));
        assert!(matches!(
            next_event(&mut rx).await,
            ScanEvent::Stopped {
                reason: StopReason::TimedOut
            }
        ));
    }

    #[tokio::test]
    async fn test_platform_failure_stops_the_pass() {
        let source = FakeSource::new();
        let session = ScanSession::new(source.clone());
        let mut rx = session.subscribe();

        session.start(filter(1_000), ScanMode::SingleShot).await.unwrap();
        assert!(matches!(next_event(&mut rx).await, ScanEvent::Started));

        source.fail(2);

        assert!(matches!(next_event(&mut rx).await, ScanEvent::Failed { code: 2 }));
        assert!(matches!(
            next_event(&mut rx).await,
            ScanEvent::Stopped {
                reason: StopReason::Failed
            }
        ));
        assert!(!session.is_scanning());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let source = FakeSource::new();
        let session = ScanSession::new(source.clone());

        // Not scanning: a no-op.
        session.stop().await.unwrap();
        assert_eq!(source.stops.load(Ordering::SeqCst), 0);

        session.start(filter(1_000), ScanMode::SingleShot).await.unwrap();
        session.stop().await.unwrap();
        session.stop().await.unwrap();
        assert!(!session.is_scanning());
        assert_eq!(source.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_while_scanning_is_a_noop() {
        let source = FakeSource::new();
        let session = ScanSession::new(source.clone());

        session.start(filter(1_000), ScanMode::SingleShot).await.unwrap();
        session.start(filter(1_000), ScanMode::SingleShot).await.unwrap();
        assert_eq!(source.starts.load(Ordering::SeqCst), 1);

        session.stop().await.unwrap();
    }
}
