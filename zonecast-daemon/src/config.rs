//! Configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use zonecast_broadcaster::ServerOptions;
use zonecast_classifier::policy::HOTEL_BEACONS;
use zonecast_classifier::ClassifierPolicy;

/// Default listening port (matches the web consumer's gateway URL)
pub const DEFAULT_PORT: u16 = 3001;

/// Simulated scanner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Milliseconds between simulated sightings
    pub interval_ms: u64,

    /// Advertised names to cycle through
    pub names: Vec<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            names: HOTEL_BEACONS.iter().map(|n| n.to_string()).collect(),
        }
    }
}

/// Gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Path to configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// TCP port clients connect to
    pub port: u16,

    /// Listener, framing and queue settings
    pub server: ServerOptions,

    /// Active classification policy and its tables
    pub classifier: ClassifierPolicy,

    /// Settings for `simulate` mode
    pub simulation: SimulationConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            port: DEFAULT_PORT,
            server: ServerOptions::default(),
            classifier: ClassifierPolicy::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from the default location, or create it
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_config_path())
    }

    /// Load configuration from `path`, writing defaults there if it is missing
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config_path = path.as_ref().to_path_buf();

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

            let mut config: GatewayConfig = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;

            config.config_path = config_path;
            Ok(config)
        } else {
            let config = Self {
                config_path,
                ..Self::default()
            };
            config.save().context("Failed to save default config")?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&self.config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get default config path
    fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("zonecast")
            .join("config.toml")
    }
}
