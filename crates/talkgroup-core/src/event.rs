//! Typed notifications posted by the engine.
//!
//! Every outcome of an engine command, and everything the engine observes on
//! the network, arrives at subscribers as one [`Event`].

use bytes::Bytes;
use serde::{Serialize, Serializer};

use crate::biometrics::Series;
use crate::group::{
    BlobInfo, GroupTalkers, PresenceDescriptor, RtpHeader, TimelineEvent, TimelineReport,
};

/// Subscription filter. An event belongs to exactly one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Engine,
    Rallypoint,
    Group,
    License,
    Biometrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    // ── Engine ──
    EngineStarted,
    EngineStopped,

    // ── Rallypoint ──
    RallypointPausingConnectionAttempt { id: String },
    RallypointConnecting { id: String },
    RallypointConnected { id: String },
    RallypointDisconnected { id: String },
    RallypointRoundtripReport { id: String, rt_ms: u32, rt_rating: u32 },

    // ── Group lifecycle ──
    GroupCreated { id: String },
    GroupCreateFailed { id: String },
    GroupDeleted { id: String },
    GroupConnected { id: String },
    GroupConnectFailed { id: String },
    GroupDisconnected { id: String },
    GroupJoined { id: String },
    GroupJoinFailed { id: String },
    GroupLeft { id: String },
    GroupMemberCountChanged { id: String, count: usize },

    // ── Receive ──
    GroupRxStarted { id: String },
    GroupRxEnded { id: String },
    GroupRxMuted { id: String },
    GroupRxUnmuted { id: String },
    GroupRxSpeakersChanged { id: String, talkers: GroupTalkers },

    // ── Transmit ──
    GroupTxStarted { id: String },
    GroupTxEnded { id: String },
    GroupTxFailed { id: String },
    GroupTxUsurpedByPriority { id: String },
    GroupMaxTxTimeExceeded { id: String },

    // ── Discovery ──
    GroupNodeDiscovered { id: String, node: PresenceDescriptor },
    GroupNodeRediscovered { id: String, node: PresenceDescriptor },
    GroupNodeUndiscovered { id: String, node: PresenceDescriptor },
    GroupAssetDiscovered { id: String, node: PresenceDescriptor },
    GroupAssetRediscovered { id: String, node: PresenceDescriptor },
    GroupAssetUndiscovered { id: String, node: PresenceDescriptor },

    // ── Delivery ──
    GroupBlobSent { id: String },
    GroupBlobSendFailed { id: String },
    GroupBlobReceived {
        id: String,
        info: BlobInfo,
        #[serde(serialize_with = "as_hex")]
        blob: Bytes,
    },
    GroupRtpSent { id: String },
    GroupRtpSendFailed { id: String },
    GroupRtpReceived {
        id: String,
        sender: String,
        header: RtpHeader,
        #[serde(serialize_with = "as_hex")]
        payload: Bytes,
    },
    GroupRawSent { id: String },
    GroupRawSendFailed { id: String },
    GroupRawReceived {
        id: String,
        sender: String,
        #[serde(serialize_with = "as_hex")]
        raw: Bytes,
    },

    // ── Timeline ──
    GroupTimelineEventStarted { id: String, timeline_event: TimelineEvent },
    GroupTimelineEventUpdated { id: String, timeline_event: TimelineEvent },
    GroupTimelineEventEnded { id: String, timeline_event: TimelineEvent },
    GroupTimelineReport { id: String, report: TimelineReport },
    GroupTimelineReportFailed { id: String },

    // ── Biometrics ──
    BiometricsReceived { id: String, sender: String, series: Vec<Series> },

    // ── License ──
    LicenseChanged,
    LicenseExpired,
    LicenseExpiring { seconds_left: u64 },
}

impl Event {
    pub fn topic(&self) -> Topic {
        use Event::*;
        match self {
            EngineStarted | EngineStopped => Topic::Engine,
            RallypointPausingConnectionAttempt { .. }
            | RallypointConnecting { .. }
            | RallypointConnected { .. }
            | RallypointDisconnected { .. }
            | RallypointRoundtripReport { .. } => Topic::Rallypoint,
            LicenseChanged | LicenseExpired | LicenseExpiring { .. } => Topic::License,
            BiometricsReceived { .. } => Topic::Biometrics,
            _ => Topic::Group,
        }
    }

    /// The group an event concerns, if any.
    pub fn group_id(&self) -> Option<&str> {
        use Event::*;
        match self {
            GroupCreated { id }
            | GroupCreateFailed { id }
            | GroupDeleted { id }
            | GroupConnected { id }
            | GroupConnectFailed { id }
            | GroupDisconnected { id }
            | GroupJoined { id }
            | GroupJoinFailed { id }
            | GroupLeft { id }
            | GroupMemberCountChanged { id, .. }
            | GroupRxStarted { id }
            | GroupRxEnded { id }
            | GroupRxMuted { id }
            | GroupRxUnmuted { id }
            | GroupRxSpeakersChanged { id, .. }
            | GroupTxStarted { id }
            | GroupTxEnded { id }
            | GroupTxFailed { id }
            | GroupTxUsurpedByPriority { id }
            | GroupMaxTxTimeExceeded { id }
            | GroupNodeDiscovered { id, .. }
            | GroupNodeRediscovered { id, .. }
            | GroupNodeUndiscovered { id, .. }
            | GroupAssetDiscovered { id, .. }
            | GroupAssetRediscovered { id, .. }
            | GroupAssetUndiscovered { id, .. }
            | GroupBlobSent { id }
            | GroupBlobSendFailed { id }
            | GroupBlobReceived { id, .. }
            | GroupRtpSent { id }
            | GroupRtpSendFailed { id }
            | GroupRtpReceived { id, .. }
            | GroupRawSent { id }
            | GroupRawSendFailed { id }
            | GroupRawReceived { id, .. }
            | GroupTimelineEventStarted { id, .. }
            | GroupTimelineEventUpdated { id, .. }
            | GroupTimelineEventEnded { id, .. }
            | GroupTimelineReport { id, .. }
            | GroupTimelineReportFailed { id }
            | BiometricsReceived { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Snake-case event name, as used in the `event` tag of its JSON form.
    pub fn name(&self) -> &'static str {
        use Event::*;
        match self {
            EngineStarted => "engine_started",
            EngineStopped => "engine_stopped",
            RallypointPausingConnectionAttempt { .. } => "rallypoint_pausing_connection_attempt",
            RallypointConnecting { .. } => "rallypoint_connecting",
            RallypointConnected { .. } => "rallypoint_connected",
            RallypointDisconnected { .. } => "rallypoint_disconnected",
            RallypointRoundtripReport { .. } => "rallypoint_roundtrip_report",
            GroupCreated { .. } => "group_created",
            GroupCreateFailed { .. } => "group_create_failed",
            GroupDeleted { .. } => "group_deleted",
            GroupConnected { .. } => "group_connected",
            GroupConnectFailed { .. } => "group_connect_failed",
            GroupDisconnected { .. } => "group_disconnected",
            GroupJoined { .. } => "group_joined",
            GroupJoinFailed { .. } => "group_join_failed",
            GroupLeft { .. } => "group_left",
            GroupMemberCountChanged { .. } => "group_member_count_changed",
            GroupRxStarted { .. } => "group_rx_started",
            GroupRxEnded { .. } => "group_rx_ended",
            GroupRxMuted { .. } => "group_rx_muted",
            GroupRxUnmuted { .. } => "group_rx_unmuted",
            GroupRxSpeakersChanged { .. } => "group_rx_speakers_changed",
            GroupTxStarted { .. } => "group_tx_started",
            GroupTxEnded { .. } => "group_tx_ended",
            GroupTxFailed { .. } => "group_tx_failed",
            GroupTxUsurpedByPriority { .. } => "group_tx_usurped_by_priority",
            GroupMaxTxTimeExceeded { .. } => "group_max_tx_time_exceeded",
            GroupNodeDiscovered { .. } => "group_node_discovered",
            GroupNodeRediscovered { .. } => "group_node_rediscovered",
            GroupNodeUndiscovered { .. } => "group_node_undiscovered",
            GroupAssetDiscovered { .. } => "group_asset_discovered",
            GroupAssetRediscovered { .. } => "group_asset_rediscovered",
            GroupAssetUndiscovered { .. } => "group_asset_undiscovered",
            GroupBlobSent { .. } => "group_blob_sent",
            GroupBlobSendFailed { .. } => "group_blob_send_failed",
            GroupBlobReceived { .. } => "group_blob_received",
            GroupRtpSent { .. } => "group_rtp_sent",
            GroupRtpSendFailed { .. } => "group_rtp_send_failed",
            GroupRtpReceived { .. } => "group_rtp_received",
            GroupRawSent { .. } => "group_raw_sent",
            GroupRawSendFailed { .. } => "group_raw_send_failed",
            GroupRawReceived { .. } => "group_raw_received",
            GroupTimelineEventStarted { .. } => "group_timeline_event_started",
            GroupTimelineEventUpdated { .. } => "group_timeline_event_updated",
            GroupTimelineEventEnded { .. } => "group_timeline_event_ended",
            GroupTimelineReport { .. } => "group_timeline_report",
            GroupTimelineReportFailed { .. } => "group_timeline_report_failed",
            BiometricsReceived { .. } => "biometrics_received",
            LicenseChanged => "license_changed",
            LicenseExpired => "license_expired",
            LicenseExpiring { .. } => "license_expiring",
        }
    }
}

fn as_hex<S: Serializer>(bytes: &Bytes, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(bytes))
}
