//! Sighting broadcast server for the zonecast gateway
//!
//! This crate provides a TCP server that fans out classified beacon sightings
//! to every connected client. Producers hand messages over without blocking;
//! a single fan-out task copies them into bounded per-client queues, and each
//! client's socket is written by its own task, so one slow or dead listener
//! never holds up the others.
//!
//! # Features
//!
//! - TCP listener on a configurable host and port
//! - Raw, newline-delimited JSON, or WebSocket framing
//! - Per-client bounded queues with slow-client eviction
//! - Failed, timed-out or disconnected clients are pruned independently
//! - Idempotent `start`/`stop`, restartable on the same port
//!
//! # Message
//!
//! Every sighting is one JSON object:
//!
//! ```json
//! {"type":"sighting","deviceId":"C4:7C:8D:6A:11:02","zoneLabel":"HotelGate",
//!  "signalStrength":-67,"timestamp":1700000000000,
//!  "beaconName":"HotelGate","zone":"HotelGate","rssi":-67}
//! ```
//!
//! # Example Usage
//!
//! ```no_run
//! use zonecast_broadcaster::{encode, BroadcastServer, ServerOptions};
//! use zonecast_classifier::{DeviceClassifier, SightingEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = BroadcastServer::new(ServerOptions::default());
//!     server.start(3001).await?;
//!
//!     let classifier = DeviceClassifier::default();
//!     let sighting = SightingEvent::new("C4:7C:8D:6A:11:02", Some("ER26B00001".into()), -67, 0);
//!     if let Some(event) = classifier.accept(sighting) {
//!         server.broadcast(encode(&event)?);
//!     }
//!
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

pub mod broadcaster;
pub mod client;
pub mod error;
pub mod events;
pub mod transport;

// Re-exports
pub use broadcaster::{BroadcastServer, ServerOptions, ServerState};
pub use client::{ClientHandle, ClientId, ClientRegistry, Delivery};
pub use error::{BroadcasterError, Result};
pub use events::{encode, BroadcastEvent, ClientMessage};
pub use transport::Framing;
