use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};
use crate::sighting::{ClassifiedEvent, SightingEvent, UNKNOWN_DEVICE_NAME};

/// Hotel beacons that are forwarded under their own name
pub const HOTEL_BEACONS: [&str; 4] = ["HotelGate", "HotelKiosk", "HotelElevator", "HotelRoom"];

/// Easy Reach tags and the hotel zone each one stands for
pub const EASY_REACH_ALIASES: [(&str, &str); 4] = [
    ("ER26B00001", "HotelGate"),
    ("ER26B00002", "HotelKiosk"),
    ("ER26B00003", "HotelElevator"),
    ("ER26B00004", "HotelRoom"),
];

/// Keywords used by the substring policy when none are configured
pub const DEFAULT_KEYWORDS: [&str; 6] = ["MWC", "Hotel", "Gate", "Kiosk", "Elevator", "Room"];

/// Which devices are relevant and how they are labelled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ClassifierPolicy {
    /// Exact name match against `names`, or alias code substituted via `aliases`
    Allowlist {
        #[serde(default)]
        names: BTreeSet<String>,
        #[serde(default)]
        aliases: BTreeMap<String, String>,
    },

    /// Any name containing one of `keywords` (case-sensitive); label is the name itself
    Substring { keywords: Vec<String> },
}

impl ClassifierPolicy {
    /// The hotel allowlist with the Easy Reach alias table
    pub fn hotel_allowlist() -> Self {
        Self::Allowlist {
            names: HOTEL_BEACONS.iter().map(|n| n.to_string()).collect(),
            aliases: EASY_REACH_ALIASES
                .iter()
                .map(|(code, zone)| (code.to_string(), zone.to_string()))
                .collect(),
        }
    }

    /// Substring matching on the stock beacon keywords
    pub fn hotel_keywords() -> Self {
        Self::Substring {
            keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Allowlist { names, aliases } => {
                if names.is_empty() && aliases.is_empty() {
                    return Err(ClassifierError::EmptyPolicy);
                }
                for name in names.iter().chain(aliases.keys()) {
                    if name == UNKNOWN_DEVICE_NAME {
                        return Err(ClassifierError::ReservedName(name.clone()));
                    }
                }
                for (code, zone) in aliases {
                    if zone.is_empty() || zone == UNKNOWN_DEVICE_NAME {
                        return Err(ClassifierError::InvalidAlias {
                            code: code.clone(),
                            zone: zone.clone(),
                        });
                    }
                }
            }
            Self::Substring { keywords } => {
                if keywords.is_empty() {
                    return Err(ClassifierError::EmptyPolicy);
                }
                // An empty keyword is a substring of every name, the sentinel included.
                if let Some(bad) = keywords.iter().find(|k| UNKNOWN_DEVICE_NAME.contains(k.as_str())) {
                    return Err(ClassifierError::KeywordMatchesSentinel(bad.clone()));
                }
            }
        }
        Ok(())
    }
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self::hotel_allowlist()
    }
}

/// Outcome of classifying one advertised name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Relevant { zone_label: String },
    Irrelevant,
}

impl Classification {
    pub fn is_relevant(&self) -> bool {
        matches!(self, Self::Relevant { .. })
    }

    pub fn zone_label(&self) -> Option<&str> {
        match self {
            Self::Relevant { zone_label } => Some(zone_label),
            Self::Irrelevant => None,
        }
    }
}

/// Validated, immutable classifier built from a [`ClassifierPolicy`]
#[derive(Debug, Clone)]
pub struct DeviceClassifier {
    policy: ClassifierPolicy,
}

impl DeviceClassifier {
    /// Validate `policy` and build a classifier from it
    pub fn new(policy: ClassifierPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &ClassifierPolicy {
        &self.policy
    }

    /// Decide whether `raw_name` is relevant and which zone it belongs to
    pub fn classify(&self, raw_name: &str) -> Classification {
        match &self.policy {
            ClassifierPolicy::Allowlist { names, aliases } => {
                if let Some(zone) = aliases.get(raw_name) {
                    Classification::Relevant { zone_label: zone.clone() }
                } else if names.contains(raw_name) {
                    Classification::Relevant { zone_label: raw_name.to_string() }
                } else {
                    Classification::Irrelevant
                }
            }
            ClassifierPolicy::Substring { keywords } => {
                if keywords.iter().any(|k| raw_name.contains(k.as_str())) {
                    Classification::Relevant { zone_label: raw_name.to_string() }
                } else {
                    Classification::Irrelevant
                }
            }
        }
    }

    /// Classify a sighting, returning the labelled event when it is relevant
    pub fn accept(&self, sighting: SightingEvent) -> Option<ClassifiedEvent> {
        match self.classify(&sighting.raw_name) {
            Classification::Relevant { zone_label } => Some(ClassifiedEvent::new(sighting, zone_label)),
            Classification::Irrelevant => None,
        }
    }
}

impl Default for DeviceClassifier {
    fn default() -> Self {
        Self { policy: ClassifierPolicy::default() }
    }
}
