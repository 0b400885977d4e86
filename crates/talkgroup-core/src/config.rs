//! Configuration system for talkgroup.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TALKGROUP_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/talkgroup/config.toml
//!   3. ~/.config/talkgroup/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::group::{GroupConfig, Identity};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub identity: Identity,
    pub network: NetworkConfig,
    pub transmit: TransmitPolicy,
    pub discovery: DiscoveryPolicy,
    pub timelines: TimelinePolicy,
    pub licensing: LicensingConfig,
    pub api: ApiConfig,
    /// Where the engine keeps its persistent state (generated node id).
    pub storage_path: PathBuf,
    /// Groups created when the daemon starts.
    pub groups: Vec<GroupConfig>,
}

/// The subset of configuration the engine is initialized with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnginePolicy {
    pub transmit: TransmitPolicy,
    pub discovery: DiscoveryPolicy,
    pub timelines: TimelinePolicy,
    pub licensing: LicensingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Multicast interface name. Empty = system default.
    pub interface: String,
    /// Multicast TTL for outbound group traffic.
    pub multicast_ttl: u32,
    /// Group address used when a group config leaves `rx.address` empty.
    pub default_address: String,
    /// Group port used when a group config leaves `rx.port` zero.
    pub default_port: u16,
    /// Seconds between rallypoint reconnect attempts.
    pub rallypoint_reconnect_secs: u64,
    /// Seconds between rallypoint round-trip pings.
    pub rallypoint_ping_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmitPolicy {
    /// Applied to groups whose `txOptions.maxTxSecs` is 0. 0 = unlimited.
    pub default_max_tx_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryPolicy {
    /// A node that has not announced for this long is undiscovered.
    pub node_ttl_secs: u64,
    /// Applied to groups whose `presence.intervalSecs` is 0.
    pub presence_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelinePolicy {
    pub enabled: bool,
    /// Events kept per group. Oldest are groomed first.
    pub max_events: usize,
    pub max_event_age_secs: u64,
    pub grooming_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LicensingConfig {
    pub entitlement: String,
    pub key: String,
    pub activation_code: String,
    /// LicenseExpiring is emitted once the remaining time drops below this.
    pub expiring_warning_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
    /// Events retained for `GET /api/events`.
    pub event_log_capacity: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            multicast_ttl: 1,
            default_address: "239.42.43.1".into(),
            default_port: 49_000,
            rallypoint_reconnect_secs: 5,
            rallypoint_ping_secs: 10,
        }
    }
}

impl Default for TransmitPolicy {
    fn default() -> Self {
        Self {
            default_max_tx_secs: 0,
        }
    }
}

impl Default for DiscoveryPolicy {
    fn default() -> Self {
        Self {
            node_ttl_secs: 30,
            presence_interval_secs: 10,
        }
    }
}

impl Default for TimelinePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_events: 1000,
            max_event_age_secs: 30 * 24 * 60 * 60,
            grooming_interval_secs: 1800,
        }
    }
}

impl Default for LicensingConfig {
    fn default() -> Self {
        Self {
            entitlement: String::new(),
            key: String::new(),
            activation_code: String::new(),
            expiring_warning_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9100,
            event_log_capacity: 1024,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("talkgroup")
}

/// Default engine storage directory.
pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("talkgroup")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("group {0}: {1}")]
    InvalidGroup(String, crate::group::GroupConfigError),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl EngineConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path, falling back to defaults if it is absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            EngineConfig::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        if config.storage_path.as_os_str().is_empty() {
            config.storage_path = data_dir();
        }
        for group in &config.groups {
            group
                .validate()
                .map_err(|e| ConfigError::InvalidGroup(group.id.clone(), e))?;
        }
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TALKGROUP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&EngineConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    pub fn policy(&self) -> EnginePolicy {
        EnginePolicy {
            transmit: self.transmit.clone(),
            discovery: self.discovery.clone(),
            timelines: self.timelines.clone(),
            licensing: self.licensing.clone(),
        }
    }

    /// Apply TALKGROUP_* overrides. `lookup` resolves a variable name.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let flag = |v: String| v == "true" || v == "1";

        if let Some(v) = lookup("TALKGROUP_IDENTITY__NODE_ID") {
            self.identity.node_id = v;
        }
        if let Some(v) = lookup("TALKGROUP_IDENTITY__USER_ID") {
            self.identity.user_id = v;
        }
        if let Some(v) = lookup("TALKGROUP_IDENTITY__DISPLAY_NAME") {
            self.identity.display_name = v;
        }
        if let Some(v) = lookup("TALKGROUP_NETWORK__INTERFACE") {
            self.network.interface = v;
        }
        if let Some(p) = lookup("TALKGROUP_NETWORK__DEFAULT_PORT").and_then(|v| v.parse().ok()) {
            self.network.default_port = p;
        }
        if let Some(v) = lookup("TALKGROUP_API__ENABLED") {
            self.api.enabled = flag(v);
        }
        if let Some(p) = lookup("TALKGROUP_API__PORT").and_then(|v| v.parse().ok()) {
            self.api.port = p;
        }
        if let Some(v) = lookup("TALKGROUP_TIMELINES__ENABLED") {
            self.timelines.enabled = flag(v);
        }
        if let Some(v) = lookup("TALKGROUP_LICENSING__ENTITLEMENT") {
            self.licensing.entitlement = v;
        }
        if let Some(v) = lookup("TALKGROUP_LICENSING__KEY") {
            self.licensing.key = v;
        }
        if let Some(v) = lookup("TALKGROUP_LICENSING__ACTIVATION_CODE") {
            self.licensing.activation_code = v;
        }
        if let Some(v) = lookup("TALKGROUP_STORAGE_PATH") {
            self.storage_path = PathBuf::from(v);
        }
    }
}
