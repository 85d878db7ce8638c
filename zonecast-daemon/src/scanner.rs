//! Scan event sources
//!
//! The radio itself is driven by the host platform. A source only has to call
//! [`SightingSink::deliver`] once per sighting, from whatever thread it owns.
//! Two sources ship with the daemon: replay of newline-delimited JSON records
//! (what a platform bridge pipes in) and a simulator for demos.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use zonecast_classifier::SightingEvent;

use crate::gateway::SightingSink;

/// Producer of sightings running outside the gateway's control
pub trait ScanSource: Send {
    fn name(&self) -> &str;

    /// Begin scanning, delivering every sighting to `sink`
    fn start(&mut self, sink: SightingSink) -> Result<()>;

    /// Stop delivering sightings; idempotent
    fn stop(&mut self);
}

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Malformed sighting record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Sighting record has an empty device id")]
    MissingDeviceId,
}

/// One line of replay input
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SightingRecord {
    pub device_id: String,
    #[serde(default, alias = "deviceName", alias = "beaconName")]
    pub name: Option<String>,
    pub rssi: i32,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl SightingRecord {
    pub fn parse(line: &str) -> Result<Self, RecordError> {
        let record: Self = serde_json::from_str(line)?;
        if record.device_id.trim().is_empty() {
            return Err(RecordError::MissingDeviceId);
        }
        Ok(record)
    }

    /// Convert to a sighting, stamping `now_millis` when the record has no timestamp
    pub fn into_sighting(self, now_millis: i64) -> SightingEvent {
        SightingEvent::new(self.device_id, self.name, self.rssi, self.timestamp.unwrap_or(now_millis))
    }
}

/// Wall-clock milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Replays newline-delimited JSON sightings from a reader on its own thread
pub struct ReplaySource {
    input: Option<Box<dyn BufRead + Send>>,
    pace: Option<Duration>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReplaySource {
    pub fn new(input: Box<dyn BufRead + Send>) -> Self {
        Self {
            input: Some(input),
            pace: None,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Read sightings from standard input
    pub fn stdin() -> Self {
        Self::new(Box::new(std::io::BufReader::new(std::io::stdin())))
    }

    /// Wait `pace` between records
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }
}

impl ScanSource for ReplaySource {
    fn name(&self) -> &str {
        "replay"
    }

    fn start(&mut self, sink: SightingSink) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(input) = self.input.take() else {
            bail!("Replay input was already consumed");
        };

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let pace = self.pace;

        let thread = std::thread::Builder::new()
            .name("zonecast-replay".to_string())
            .spawn(move || {
                for (index, line) in input.lines().enumerate() {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            warn!("Replay input error: {}", e);
                            break;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match SightingRecord::parse(&line) {
                        Ok(record) => sink.deliver(record.into_sighting(now_millis())),
                        Err(e) => warn!("Skipping line {}: {}", index + 1, e),
                    }
                    if let Some(pace) = pace {
                        std::thread::sleep(pace);
                    }
                }
                info!("Replay input finished");
            })
            .context("Failed to spawn replay thread")?;

        self.thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            // A reader blocked on stdin cannot be interrupted; leave it detached.
            if thread.is_finished() {
                let _ = thread.join();
            } else {
                debug!("Replay thread still blocked on input; detaching");
            }
        }
    }
}

impl Drop for ReplaySource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Emits sightings for a fixed list of names at a steady interval
pub struct SimulatedSource {
    names: Vec<String>,
    interval: Duration,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SimulatedSource {
    pub fn new(names: Vec<String>, interval: Duration) -> Self {
        Self {
            names,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

/// Deterministic RSSI sweep between -90 and -41
fn simulated_rssi(tick: u64) -> i32 {
    -90 + ((tick * 7) % 50) as i32
}

impl ScanSource for SimulatedSource {
    fn name(&self) -> &str {
        "simulate"
    }

    fn start(&mut self, sink: SightingSink) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.names.is_empty() {
            bail!("Simulation needs at least one beacon name");
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let names = self.names.clone();
        let interval = self.interval;

        let thread = std::thread::Builder::new()
            .name("zonecast-simulate".to_string())
            .spawn(move || {
                let mut tick: u64 = 0;
                while running.load(Ordering::SeqCst) {
                    let index = (tick % names.len() as u64) as usize;
                    let sighting = SightingEvent::new(
                        format!("5A:0C:00:00:00:{:02X}", index),
                        Some(names[index].clone()),
                        simulated_rssi(tick),
                        now_millis(),
                    );
                    sink.deliver(sighting);
                    tick += 1;
                    std::thread::sleep(interval);
                }
            })
            .context("Failed to spawn simulation thread")?;

        info!("Simulating {} beacon(s) every {:?}", self.names.len(), self.interval);
        self.thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SimulatedSource {
    fn drop(&mut self) {
        self.stop();
    }
}
