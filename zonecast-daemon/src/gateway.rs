//! Sighting pipeline: scan source → classifier → encoder → broadcast server

use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info, trace, warn};
use zonecast_broadcaster::{encode, BroadcastServer, BroadcasterError};
use zonecast_classifier::{DeviceClassifier, SightingEvent};

use crate::config::GatewayConfig;
use crate::scanner::ScanSource;

/// Per-outcome sighting counters
#[derive(Debug, Default)]
pub struct SinkStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`SinkStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub rejected: u64,
    pub failed: u64,
}

impl SinkStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Callback handed to scan sources.
///
/// `deliver` only classifies, encodes and enqueues, so it is safe to call
/// from a platform callback thread at any rate.
#[derive(Clone)]
pub struct SightingSink {
    classifier: Arc<DeviceClassifier>,
    server: Arc<BroadcastServer>,
    stats: Arc<SinkStats>,
}

impl SightingSink {
    pub fn new(classifier: Arc<DeviceClassifier>, server: Arc<BroadcastServer>) -> Self {
        Self {
            classifier,
            server,
            stats: Arc::new(SinkStats::default()),
        }
    }

    /// Process one sighting; failures are logged and never propagate
    pub fn deliver(&self, sighting: SightingEvent) {
        let device_id = sighting.device_id.clone();
        match panic::catch_unwind(AssertUnwindSafe(|| self.process(sighting))) {
            Ok(Ok(true)) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Ok(false)) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping sighting from {}: {}", device_id, e);
            }
            Err(_) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!("Panic while processing sighting from {}; event dropped", device_id);
            }
        }
    }

    fn process(&self, sighting: SightingEvent) -> Result<bool, BroadcasterError> {
        let Some(event) = self.classifier.accept(sighting) else {
            return Ok(false);
        };
        let message = encode(&event)?;
        trace!("Sighting {} in {} ({} dBm)", event.device_id(), event.zone_label(), event.signal_strength());
        self.server.broadcast(message);
        Ok(true)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

/// The running gateway: one broadcast server fed by one scan source
pub struct Gateway {
    port: u16,
    server: Arc<BroadcastServer>,
    sink: SightingSink,
    source: Box<dyn ScanSource>,
    scanning: bool,
}

impl Gateway {
    /// Validate the classifier tables and assemble the pipeline
    pub fn new(config: &GatewayConfig, source: Box<dyn ScanSource>) -> Result<Self> {
        let classifier = DeviceClassifier::new(config.classifier.clone()).context("Invalid classifier configuration")?;
        let server = Arc::new(BroadcastServer::new(config.server.clone()));
        let sink = SightingSink::new(Arc::new(classifier), Arc::clone(&server));

        Ok(Self {
            port: config.port,
            server,
            sink,
            source,
            scanning: false,
        })
    }

    /// Bind the listener, then start the scan source.
    ///
    /// If binding fails the source is never started.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let addr = self
            .server
            .start(self.port)
            .await
            .with_context(|| format!("Failed to start broadcast server on port {}", self.port))?;

        if !self.scanning {
            if let Err(e) = self.source.start(self.sink.clone()) {
                self.server.stop().await;
                return Err(e.context(format!("Failed to start {} source", self.source.name())));
            }
            self.scanning = true;
            info!("Scan source '{}' started", self.source.name());
        }

        Ok(addr)
    }

    /// Stop scanning, then close every client and release the port
    pub async fn stop(&mut self) {
        if self.scanning {
            self.source.stop();
            self.scanning = false;
            info!("Scan source '{}' stopped", self.source.name());
        }
        self.server.stop().await;

        let stats = self.sink.stats();
        debug!(
            "Sightings: {} broadcast, {} filtered, {} failed",
            stats.accepted, stats.rejected, stats.failed
        );
    }

    pub fn server(&self) -> &BroadcastServer {
        &self.server
    }

    /// Sink wired to this gateway's classifier and server
    pub fn sink(&self) -> SightingSink {
        self.sink.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.sink.stats()
    }
}
