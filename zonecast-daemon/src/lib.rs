//! zonecast daemon library
//!
//! This module re-exports the daemon's modules for integration testing.

pub mod config;
pub mod gateway;
pub mod scanner;

pub use config::GatewayConfig;
pub use gateway::{Gateway, SightingSink, StatsSnapshot};
pub use scanner::{ReplaySource, ScanSource, SimulatedSource, SightingRecord};
