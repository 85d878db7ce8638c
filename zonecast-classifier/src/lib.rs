//! Beacon classification for the zonecast gateway
//!
//! Maps the name a nearby transmitter advertises to a hotel zone label, or
//! rejects it. Two policies are supported and chosen at deployment time:
//!
//! - **Allowlist** - exact beacon names, plus alias codes (e.g. Easy Reach
//!   tags `ER26B0000x`) that are substituted with a zone label
//! - **Substring** - any name containing one of a set of keywords
//!
//! Devices that advertise no name are reported as `"Unknown"`, which no valid
//! policy can match.
//!
//! # Example
//!
//! ```
//! use zonecast_classifier::{DeviceClassifier, SightingEvent};
//!
//! let classifier = DeviceClassifier::default();
//! let sighting = SightingEvent::new("C4:7C:8D:6A:11:02", Some("ER26B00001".into()), -67, 0);
//! let event = classifier.accept(sighting).unwrap();
//! assert_eq!(event.zone_label(), "HotelGate");
//! ```

pub mod error;
pub mod policy;
pub mod sighting;

pub use error::{ClassifierError, Result};
pub use policy::{Classification, ClassifierPolicy, DeviceClassifier};
pub use sighting::{ClassifiedEvent, SightingEvent, UNKNOWN_DEVICE_NAME};
