//! Structured group configuration and per-operation metadata.
//!
//! Everything that crosses the engine boundary as JSON is modelled here as a
//! typed struct. JSON field names are camelCase. Construction from JSON
//! always validates.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Longest group id accepted, in bytes.
pub const MAX_GROUP_ID_LEN: usize = 64;

/// Longest group display name accepted, in bytes.
pub const MAX_GROUP_NAME_LEN: usize = 128;

/// Longest talker alias accepted, in bytes.
pub const MAX_ALIAS_LEN: usize = 32;

// ── Group configuration ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    #[default]
    Audio,
    Presence,
    Raw,
}

/// Configuration a group is created from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupConfig {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub group_type: GroupType,
    /// Non-empty enables payload encryption for the group.
    pub crypto_password: String,
    /// Alias presented to other members when transmitting.
    pub alias: String,
    pub tx_options: TxOptions,
    /// Receive address. Empty address = transport default.
    pub rx: NetworkAddress,
    /// Transmit address. Empty address = same as `rx`.
    pub tx: NetworkAddress,
    pub presence: PresenceSettings,
    pub rallypoints: Vec<RallypointAddress>,
    pub timeline: GroupTimelineSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TxOptions {
    /// Full duplex: transmit never excludes other talkers.
    pub fdx: bool,
    /// Force-end a local transmit after this many seconds. 0 = engine default.
    pub max_tx_secs: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkAddress {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresenceSettings {
    /// Seconds between presence announcements. 0 = engine default.
    pub interval_secs: u32,
    /// Do not announce; only listen.
    pub listen_only: bool,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            interval_secs: 0,
            listen_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RallypointAddress {
    pub host: String,
    pub port: u16,
}

impl RallypointAddress {
    /// Stable id used in rallypoint events.
    pub fn id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupTimelineSettings {
    pub enabled: bool,
    /// Media bytes recorded per timeline event before it is marked truncated.
    pub max_attachment_bytes: u64,
}

impl Default for GroupTimelineSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attachment_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupConfigError {
    #[error("group id is empty")]
    EmptyId,
    #[error("group id is {0} bytes, at most {} allowed", MAX_GROUP_ID_LEN)]
    IdTooLong(usize),
    #[error("group name is {0} bytes, at most {} allowed", MAX_GROUP_NAME_LEN)]
    NameTooLong(usize),
    #[error("alias is {0} bytes, at most {} allowed", MAX_ALIAS_LEN)]
    AliasTooLong(usize),
    #[error("invalid address: {0}")]
    BadAddress(String),
    #[error("rtp payload type {0} out of range 0..=127")]
    BadPayloadType(u8),
    #[error("rx volume {0} out of range 0..=100")]
    BadVolume(u8),
    #[error("invalid JSON: {0}")]
    Json(String),
}

impl GroupConfig {
    /// Parse and validate a group configuration.
    pub fn from_json(json: &str) -> Result<Self, GroupConfigError> {
        let config: GroupConfig =
            serde_json::from_str(json).map_err(|e| GroupConfigError::Json(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GroupConfigError> {
        if self.id.is_empty() {
            return Err(GroupConfigError::EmptyId);
        }
        if self.id.len() > MAX_GROUP_ID_LEN {
            return Err(GroupConfigError::IdTooLong(self.id.len()));
        }
        if self.name.len() > MAX_GROUP_NAME_LEN {
            return Err(GroupConfigError::NameTooLong(self.name.len()));
        }
        validate_alias(&self.alias)?;
        for addr in [&self.rx, &self.tx] {
            if !addr.address.is_empty() && addr.address.parse::<IpAddr>().is_err() {
                return Err(GroupConfigError::BadAddress(addr.address.clone()));
            }
        }
        for rp in &self.rallypoints {
            if rp.host.is_empty() || rp.port == 0 {
                return Err(GroupConfigError::BadAddress(rp.id()));
            }
        }
        Ok(())
    }

    pub fn is_encrypted(&self) -> bool {
        !self.crypto_password.is_empty()
    }

    pub fn descriptor(&self) -> GroupDescriptor {
        GroupDescriptor {
            id: self.id.clone(),
            name: self.name.clone(),
            encrypted: self.is_encrypted(),
            full_duplex: self.tx_options.fdx,
        }
    }
}

fn validate_alias(alias: &str) -> Result<(), GroupConfigError> {
    if alias.len() > MAX_ALIAS_LEN {
        return Err(GroupConfigError::AliasTooLong(alias.len()));
    }
    Ok(())
}

/// Rx volume is a percentage per channel.
pub fn validate_volume(left: u8, right: u8) -> Result<(), GroupConfigError> {
    match [left, right].into_iter().find(|v| *v > 100) {
        Some(v) => Err(GroupConfigError::BadVolume(v)),
        None => Ok(()),
    }
}

/// The caller-visible summary of a created group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDescriptor {
    pub id: String,
    pub name: String,
    pub encrypted: bool,
    pub full_duplex: bool,
}

// ── Transmit parameters ───────────────────────────────────────────────────────

/// Parameters of a transmit request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TxParams {
    pub flags: u16,
    pub priority: u8,
    pub subchannel_tag: u16,
    pub include_node_id: bool,
    /// Distinguishes local talkers sharing one node. Empty = the group alias.
    pub alias: String,
}

impl TxParams {
    pub fn new(priority: u8, flags: u16) -> Self {
        Self {
            priority,
            flags,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, GroupConfigError> {
        let params: TxParams =
            serde_json::from_str(json).map_err(|e| GroupConfigError::Json(e.to_string()))?;
        validate_alias(&params.alias)?;
        Ok(params)
    }
}

// ── Delivery metadata ─────────────────────────────────────────────────────────

/// RTP header fields of an RTP delivery unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpHeader {
    pub pt: u8,
    pub marker: bool,
    pub seq: u16,
    pub ssrc: u32,
    pub ts: u32,
}

impl RtpHeader {
    pub fn validate(&self) -> Result<(), GroupConfigError> {
        if self.pt > 127 {
            return Err(GroupConfigError::BadPayloadType(self.pt));
        }
        Ok(())
    }
}

/// What a blob's bytes contain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", from = "u8")]
pub enum BlobPayloadType {
    #[default]
    Undefined,
    AppTextUtf8,
    JsonTextUtf8,
    AppBinary,
    /// Human-biometrics time series, see [`crate::biometrics`].
    Biometrics,
}

impl From<u8> for BlobPayloadType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::AppTextUtf8,
            2 => Self::JsonTextUtf8,
            3 => Self::AppBinary,
            4 => Self::Biometrics,
            _ => Self::Undefined,
        }
    }
}

impl From<BlobPayloadType> for u8 {
    fn from(t: BlobPayloadType) -> u8 {
        match t {
            BlobPayloadType::Undefined => 0,
            BlobPayloadType::AppTextUtf8 => 1,
            BlobPayloadType::JsonTextUtf8 => 2,
            BlobPayloadType::AppBinary => 3,
            BlobPayloadType::Biometrics => 4,
        }
    }
}

/// Metadata travelling with a blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlobInfo {
    pub size: usize,
    /// Sender node id (hex). Filled in by the engine on send.
    pub source: String,
    /// Target node id (hex). Empty = every member.
    pub target: String,
    pub payload_type: BlobPayloadType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtp_header: Option<RtpHeader>,
}

impl BlobInfo {
    pub fn new(payload_type: BlobPayloadType) -> Self {
        Self {
            payload_type,
            ..Self::default()
        }
    }
}

// ── Presence ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Identity {
    /// 16 hex chars. Empty = generated by the engine.
    pub node_id: String,
    pub user_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// What a node or asset announces about itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresenceDescriptor {
    pub identity: Identity,
    /// Non-human source such as a sensor feed.
    pub asset: bool,
    pub comment: String,
    pub custom: String,
    pub disposition: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

/// A current transmitter as seen by receivers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TalkerInformation {
    pub alias: String,
    pub node_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupTalkers {
    pub list: Vec<TalkerInformation>,
}

// ── Timeline ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One transmit or receive spurt recorded in a group timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub id: u64,
    pub direction: Direction,
    pub node_id: String,
    pub alias: String,
    /// Unix milliseconds.
    pub started: u64,
    /// Unix milliseconds. None while in progress.
    pub ended: Option<u64>,
    pub attachment_bytes: u64,
    /// Media beyond the attachment quota was not recorded.
    pub truncated: bool,
}

impl TimelineEvent {
    pub fn in_progress(&self) -> bool {
        self.ended.is_none()
    }
}

/// Filter for a timeline query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimelineQuery {
    pub max_count: usize,
    pub most_recent_first: bool,
    /// Unix ms; 0 = no bound.
    pub started_on_or_after: u64,
    /// Unix ms; 0 = no bound. In-progress events never match a set bound.
    pub ended_on_or_before: u64,
    pub only_direction: Option<Direction>,
    pub only_alias: Option<String>,
    pub only_node_id: Option<String>,
}

impl Default for TimelineQuery {
    fn default() -> Self {
        Self {
            max_count: 50,
            most_recent_first: true,
            started_on_or_after: 0,
            ended_on_or_before: 0,
            only_direction: None,
            only_alias: None,
            only_node_id: None,
        }
    }
}

impl TimelineQuery {
    pub fn from_json(json: &str) -> Result<Self, GroupConfigError> {
        serde_json::from_str(json).map_err(|e| GroupConfigError::Json(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineReport {
    pub group_id: String,
    /// Events matching the filter before `maxCount` was applied.
    pub total_matched: usize,
    pub events: Vec<TimelineEvent>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
