use bytes::Bytes;
use serde::{Deserialize, Serialize};
use zonecast_classifier::ClassifiedEvent;

/// Messages broadcast to connected clients
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum BroadcastEvent {
    /// A relevant beacon was seen
    #[serde(rename = "sighting", rename_all = "camelCase")]
    Sighting {
        device_id: String,
        zone_label: String,
        signal_strength: i32,
        timestamp: i64,
        // Duplicates read by the existing web consumer
        beacon_name: String,
        zone: String,
        rssi: i32,
    },
}

impl BroadcastEvent {
    pub fn sighting(event: &ClassifiedEvent) -> Self {
        Self::Sighting {
            device_id: event.device_id().to_string(),
            zone_label: event.zone_label().to_string(),
            signal_strength: event.signal_strength(),
            timestamp: event.observed_at_millis(),
            beacon_name: event.zone_label().to_string(),
            zone: event.zone_label().to_string(),
            rssi: event.signal_strength(),
        }
    }

    /// Convert event to a JSON document (no trailing delimiter)
    pub fn to_json(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

/// Encode a classified sighting into its wire message
pub fn encode(event: &ClassifiedEvent) -> Result<Bytes, serde_json::Error> {
    BroadcastEvent::sighting(event).to_json()
}

/// Messages a client may send to the gateway
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Subscribe {
        #[serde(default)]
        user_id: Option<String>,
    },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text.trim()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonecast_classifier::{DeviceClassifier, SightingEvent};

    fn classified(name: &str, rssi: i32) -> ClassifiedEvent {
        DeviceClassifier::default()
            .accept(SightingEvent::new("C4:7C:8D:6A:11:02", Some(name.to_string()), rssi, 1_700_000_000_000))
            .unwrap()
    }

    #[test]
    fn test_sighting_serialization() {
        let json = encode(&classified("ER26B00001", -67)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["type"], "sighting");
        assert_eq!(value["deviceId"], "C4:7C:8D:6A:11:02");
        assert_eq!(value["zoneLabel"], "HotelGate");
        assert_eq!(value["signalStrength"], -67);
        assert_eq!(value["timestamp"], 1_700_000_000_000_i64);
    }

    #[test]
    fn test_legacy_fields_mirror_zone_and_rssi() {
        let json = encode(&classified("HotelKiosk", -80)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["beaconName"], "HotelKiosk");
        assert_eq!(value["zone"], "HotelKiosk");
        assert_eq!(value["rssi"], -80);
    }

    #[test]
    fn test_field_set_is_stable() {
        let a: serde_json::Value = serde_json::from_slice(&encode(&classified("HotelRoom", -40)).unwrap()).unwrap();
        let b: serde_json::Value = serde_json::from_slice(&encode(&classified("ER26B00003", -99)).unwrap()).unwrap();
        let keys = |v: &serde_json::Value| v.as_object().unwrap().keys().cloned().collect::<Vec<_>>();
        assert_eq!(keys(&a), keys(&b));
        assert_eq!(keys(&a).len(), 8);
    }

    #[test]
    fn test_encoded_message_has_no_delimiter() {
        let json = encode(&classified("HotelGate", -50)).unwrap();
        assert!(!json.ends_with(b"\n"));
    }

    #[test]
    fn test_parse_subscribe() {
        let msg = ClientMessage::parse(r#"{"type":"subscribe","userId":"hotel-demo-subscription"}"#);
        assert_eq!(
            msg,
            Some(ClientMessage::Subscribe { user_id: Some("hotel-demo-subscription".to_string()) })
        );
        assert_eq!(ClientMessage::parse("hello"), None);
    }
}
