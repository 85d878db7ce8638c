use serde::{Deserialize, Serialize};

/// Name substituted for devices that advertise no name.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown";

/// One radio sighting as reported by the scanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SightingEvent {
    pub device_id: String,
    pub raw_name: String,
    pub signal_strength: i32,
    pub observed_at_millis: i64,
}

impl SightingEvent {
    /// Build a sighting, substituting [`UNKNOWN_DEVICE_NAME`] for a missing name
    pub fn new(
        device_id: impl Into<String>,
        raw_name: Option<String>,
        signal_strength: i32,
        observed_at_millis: i64,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            raw_name: raw_name.unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string()),
            signal_strength,
            observed_at_millis,
        }
    }
}

/// A sighting the classifier accepted, labelled with its zone.
///
/// Only [`DeviceClassifier::accept`](crate::DeviceClassifier::accept) can build one,
/// so holding a `ClassifiedEvent` means the device passed the active policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedEvent {
    device_id: String,
    zone_label: String,
    signal_strength: i32,
    observed_at_millis: i64,
}

impl ClassifiedEvent {
    pub(crate) fn new(sighting: SightingEvent, zone_label: String) -> Self {
        Self {
            device_id: sighting.device_id,
            zone_label,
            signal_strength: sighting.signal_strength,
            observed_at_millis: sighting.observed_at_millis,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn zone_label(&self) -> &str {
        &self.zone_label
    }

    pub fn signal_strength(&self) -> i32 {
        self.signal_strength
    }

    pub fn observed_at_millis(&self) -> i64 {
        self.observed_at_millis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_name_becomes_unknown() {
        let sighting = SightingEvent::new("AA:BB:CC:DD:EE:FF", None, -70, 1_700_000_000_000);
        assert_eq!(sighting.raw_name, UNKNOWN_DEVICE_NAME);
    }

    #[test]
    fn test_present_name_is_kept() {
        let sighting = SightingEvent::new("AA:BB", Some("HotelGate".to_string()), -50, 1);
        assert_eq!(sighting.raw_name, "HotelGate");
        assert_eq!(sighting.signal_strength, -50);
    }
}
