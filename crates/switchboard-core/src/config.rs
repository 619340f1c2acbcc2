//! Configuration system for Switchboard
//!
//! Supports TOML configuration files with sensible defaults.
//! Configuration is loaded from:
//! - macOS: ~/Library/Application Support/switchboard/config.toml
//! - Linux: ~/.config/switchboard/config.toml
//! - Windows: %APPDATA%/switchboard/config.toml

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::{DEFAULT_CREDENTIAL_TTL_SECS, MAX_INTERVAL_SECS, MAX_PONG_WAIT_MULTIPLIER};

/// Shared key used to sign relay credentials when none is configured
pub const DEFAULT_SHARED_KEY: &str = "switchboard-relay-shared-key";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Signaling endpoint settings
    pub signal: SignalConfig,
    /// Relay credential settings
    pub relay: RelayConfig,
}

/// Signaling endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Bind address
    pub bind: IpAddr,
    /// Listen port (WebSocket and HTTP share it)
    pub port: u16,
    /// Interval between liveness probes
    pub ping_period_secs: u64,
    /// Probe periods without a pong before a connection is declared dead
    pub pong_wait_multiplier: u32,
    /// Upper bound for a single probe write
    pub write_timeout_secs: u64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8086,
            ping_period_secs: 5,
            pong_wait_multiplier: 3,
            write_timeout_secs: 5,
        }
    }
}

// Out-of-range values are clamped so deadlines never overflow an Instant
impl SignalConfig {
    pub fn ping_period(&self) -> Duration {
        Duration::from_secs(self.ping_period_secs.clamp(1, MAX_INTERVAL_SECS))
    }

    pub fn pong_wait(&self) -> Duration {
        self.ping_period() * self.pong_wait_multiplier.clamp(1, MAX_PONG_WAIT_MULTIPLIER)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs.clamp(1, MAX_INTERVAL_SECS))
    }
}

/// Relay (TURN) credential configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Public address advertised in relay URIs
    pub public_ip: String,
    /// UDP relay port
    pub port: u16,
    /// TCP relay port
    pub tcp_port: u16,
    /// Authentication realm handed to the relay engine
    pub realm: String,
    /// Key for signing issued credentials
    pub shared_key: String,
    /// Lifetime of issued credentials in seconds
    pub credential_ttl_secs: u64,
    /// How often expired credentials are swept from memory
    pub sweep_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            public_ip: "127.0.0.1".into(),
            port: 19302,
            tcp_port: 19303,
            realm: "switchboard".into(),
            shared_key: DEFAULT_SHARED_KEY.into(),
            credential_ttl_secs: DEFAULT_CREDENTIAL_TTL_SECS,
            sweep_interval_secs: 60,
        }
    }
}

impl RelayConfig {
    /// Relay URIs handed out with every credential (UDP first, then TCP)
    pub fn uris(&self) -> Vec<String> {
        vec![
            format!("turn:{}:{}?transport=udp", self.public_ip, self.port),
            format!("turn:{}:{}?transport=tcp", self.public_ip, self.tcp_port),
        ]
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("Failed to load config from {:?}: {}, using defaults", path, e);
                Self::default()
            }),
            None => {
                debug!("No config directory found, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "switchboard", "switchboard")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Generate a sample configuration file content
    pub fn sample() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
