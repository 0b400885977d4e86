//! Group session — the per-group state machine.
//!
//! A session owns everything about one group: lifecycle state, the transmit
//! floor, rx settings, the presence registry and the timeline. Operations run
//! under the group's mutex, send frames through the transport directly, and
//! append the resulting events to `out` for the caller to post in order.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use talkgroup_core::config::{EnginePolicy, TimelinePolicy};
use talkgroup_core::crypto::{CryptoError, GroupCipher};
use talkgroup_core::group::{
    Direction, GroupConfig, GroupDescriptor, Identity, PresenceDescriptor, TalkerInformation,
    TimelineQuery, TxParams,
};
use talkgroup_core::wire::{group_hash, Frame, FrameKind, GroupHash, NodeId, WireError};
use talkgroup_core::Event;

use crate::arbitration::{Claim, ClaimOutcome, Floor, Talker};
use crate::discovery::{PresenceChange, PresenceEntry, PresenceRegistry};
use crate::timeline::{SpurtKey, Timeline};
use crate::transport::{Transport, TransportError, TransportSink};

/// Local claims are re-announced this often while held.
pub const FLOOR_REFRESH: Duration = Duration::from_secs(1);

/// A remote claim not refreshed for this long is dropped.
pub const REMOTE_CLAIM_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupState {
    Created,
    Connecting,
    Connected,
    Joining,
    Joined,
    Leaving,
    Disconnected,
}

/// This engine's identity on every group.
#[derive(Debug, Clone)]
pub struct LocalNode {
    pub node_id: NodeId,
    pub identity: Identity,
}

impl LocalNode {
    pub fn new(node_id: NodeId, mut identity: Identity) -> Self {
        identity.node_id = hex::encode(node_id);
        Self { node_id, identity }
    }

    pub fn hex_id(&self) -> String {
        hex::encode(self.node_id)
    }

    pub fn descriptor(&self) -> PresenceDescriptor {
        PresenceDescriptor {
            identity: self.identity.clone(),
            ..PresenceDescriptor::default()
        }
    }
}

/// Everything an operation needs from the engine.
pub struct Ctx<'a> {
    pub transport: &'a dyn Transport,
    pub sink: &'a TransportSink,
    pub local: &'a LocalNode,
    pub now: Instant,
    /// Wall clock, unix milliseconds.
    pub now_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("wire: {0}")]
    Wire(#[from] WireError),
    #[error("payload: {0}")]
    Payload(String),
}

/// Snapshot of a session for status reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStatus {
    #[serde(flatten)]
    pub descriptor: GroupDescriptor,
    pub state: GroupState,
    pub rx_muted: bool,
    pub rx_volume: (u8, u8),
    pub rx_tag: u16,
    pub members: usize,
    pub assets: usize,
    pub transmitting: bool,
    pub talkers: Vec<TalkerInformation>,
    pub timeline_events: usize,
}

pub struct GroupSession {
    pub(crate) config: GroupConfig,
    pub(crate) hash: GroupHash,
    pub(crate) state: GroupState,
    pub(crate) floor: Floor,
    pub(crate) rx_muted: bool,
    rx_volume: (u8, u8),
    rx_tag: u16,
    pub(crate) presence: PresenceRegistry,
    pub(crate) timeline: Timeline,
    pub(crate) timeline_enabled: bool,
    pub(crate) cipher: Option<GroupCipher>,
    last_presence: Option<Instant>,
    last_member_count: usize,
    max_tx: Option<Duration>,
    presence_every: Duration,
    node_ttl: Duration,
}

impl GroupSession {
    pub fn new(config: GroupConfig, policy: &EnginePolicy) -> Result<Self, CryptoError> {
        let cipher = if config.is_encrypted() {
            Some(GroupCipher::new(&config.crypto_password)?)
        } else {
            None
        };

        let max_tx_secs = match config.tx_options.max_tx_secs {
            0 => policy.transmit.default_max_tx_secs,
            n => n,
        };
        let presence_secs = match config.presence.interval_secs {
            0 => policy.discovery.presence_interval_secs,
            n => u64::from(n),
        };

        Ok(Self {
            hash: group_hash(&config.id),
            state: GroupState::Created,
            floor: Floor::new(config.tx_options.fdx),
            rx_muted: false,
            rx_volume: (100, 100),
            rx_tag: 0,
            presence: PresenceRegistry::new(),
            timeline: Timeline::new(config.timeline.max_attachment_bytes, policy.timelines.max_events),
            timeline_enabled: policy.timelines.enabled && config.timeline.enabled,
            cipher,
            last_presence: None,
            last_member_count: 1,
            max_tx: (max_tx_secs > 0).then(|| Duration::from_secs(u64::from(max_tx_secs))),
            presence_every: Duration::from_secs(presence_secs.max(1)),
            node_ttl: Duration::from_secs(policy.discovery.node_ttl_secs),
            config,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    pub fn is_joined(&self) -> bool {
        self.state == GroupState::Joined
    }

    pub fn status(&self) -> GroupStatus {
        GroupStatus {
            descriptor: self.config.descriptor(),
            state: self.state,
            rx_muted: self.rx_muted,
            rx_volume: self.rx_volume,
            rx_tag: self.rx_tag,
            members: self.presence.member_count(),
            assets: self.presence.asset_count(),
            transmitting: self.floor.has_local(),
            talkers: self.floor.remote_talkers(),
            timeline_events: self.timeline.len(),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    pub fn join(&mut self, ctx: &Ctx, out: &mut Vec<Event>) {
        let id = self.config.id.clone();
        if matches!(
            self.state,
            GroupState::Connecting | GroupState::Joining | GroupState::Joined | GroupState::Leaving
        ) {
            tracing::debug!(group = %id, state = ?self.state, "join ignored in current state");
            out.push(Event::GroupJoinFailed { id });
            return;
        }

        self.state = GroupState::Connecting;
        if let Err(e) = ctx.transport.open(&self.config, ctx.sink.clone()) {
            tracing::warn!(group = %id, error = %e, "group connect failed");
            self.state = GroupState::Created;
            out.push(Event::GroupConnectFailed { id });
            return;
        }
        self.state = GroupState::Connected;
        out.push(Event::GroupConnected { id: id.clone() });

        self.state = GroupState::Joining;
        if !self.config.presence.listen_only {
            if let Err(e) = self.announce(ctx) {
                tracing::warn!(group = %id, error = %e, "group join failed");
                ctx.transport.close(&id);
                self.state = GroupState::Disconnected;
                out.push(Event::GroupJoinFailed { id });
                return;
            }
        }
        self.last_presence = Some(ctx.now);
        self.state = GroupState::Joined;
        tracing::info!(group = %id, "group joined");
        out.push(Event::GroupJoined { id });
    }

    pub fn leave(&mut self, ctx: &Ctx, out: &mut Vec<Event>) {
        let id = self.config.id.clone();
        if self.state != GroupState::Joined {
            tracing::debug!(group = %id, state = ?self.state, "leave ignored: not joined");
            return;
        }
        self.state = GroupState::Leaving;

        self.end_local_claims(ctx, true, out);
        if let Err(e) = self.send(ctx, FrameKind::Depart, Vec::new(), 0) {
            tracing::debug!(group = %id, error = %e, "depart not sent");
        }
        ctx.transport.close(&id);
        self.drop_remote_state(ctx, out);

        self.state = GroupState::Disconnected;
        tracing::info!(group = %id, "group left");
        out.push(Event::GroupLeft { id: id.clone() });
        out.push(Event::GroupDisconnected { id });
    }

    /// Release everything before the session is removed from the table.
    /// The caller posts GroupDeleted.
    pub fn teardown(&mut self, ctx: &Ctx, out: &mut Vec<Event>) {
        let joined = self.is_joined();
        self.end_local_claims(ctx, joined, out);
        if joined {
            if let Err(e) = self.send(ctx, FrameKind::Depart, Vec::new(), 0) {
                tracing::debug!(group = %self.config.id, error = %e, "depart not sent");
            }
        }
        ctx.transport.close(&self.config.id);
        self.state = GroupState::Disconnected;
    }

    /// The transport lost the group's link.
    pub fn link_lost(&mut self, ctx: &Ctx, out: &mut Vec<Event>) {
        let id = self.config.id.clone();
        if !matches!(
            self.state,
            GroupState::Connected | GroupState::Joining | GroupState::Joined
        ) {
            return;
        }
        tracing::warn!(group = %id, "group link lost");
        self.end_local_claims(ctx, false, out);
        self.drop_remote_state(ctx, out);
        ctx.transport.close(&id);
        self.state = GroupState::Disconnected;
        out.push(Event::GroupDisconnected { id });
    }

    // ── Transmit ─────────────────────────────────────────────────────────────

    pub fn begin_tx(&mut self, ctx: &Ctx, params: &TxParams, out: &mut Vec<Event>) {
        let id = self.config.id.clone();
        if !self.is_joined() {
            out.push(Event::GroupTxFailed { id });
            return;
        }

        let alias = if params.alias.is_empty() {
            self.config.alias.clone()
        } else {
            params.alias.clone()
        };
        let talker = Talker::new(ctx.local.node_id, alias);
        let before = self.floor.remote_talkers();

        match self.floor.request(talker.clone(), params.priority, true, ctx.now) {
            ClaimOutcome::AlreadyHeld => {
                tracing::debug!(group = %id, alias = %talker.alias, "already transmitting");
            }
            ClaimOutcome::Denied { holder } => {
                tracing::debug!(
                    group = %id,
                    holder = hex::encode(holder.node_id),
                    "transmit denied"
                );
                out.push(Event::GroupTxFailed { id });
            }
            ClaimOutcome::Granted { preempted } => {
                if let Err(e) = self.send_floor(ctx, FrameKind::FloorClaim, &talker, params.priority) {
                    tracing::warn!(group = %id, error = %e, "floor claim not sent");
                    self.floor.release(&talker);
                    out.push(Event::GroupTxFailed { id });
                    return;
                }
                self.on_preempted(ctx, preempted, out);
                self.emit_speakers(before, out);
                out.push(Event::GroupTxStarted { id });
                self.timeline_begin(ctx, spurt(&talker, Direction::Outbound), out);
            }
        }
    }

    pub fn end_tx(&mut self, ctx: &Ctx, out: &mut Vec<Event>) {
        let joined = self.is_joined();
        self.end_local_claims(ctx, joined, out);
    }

    // ── Receive settings ─────────────────────────────────────────────────────

    pub fn mute_rx(&mut self, out: &mut Vec<Event>) {
        self.rx_muted = true;
        out.push(Event::GroupRxMuted {
            id: self.config.id.clone(),
        });
    }

    pub fn unmute_rx(&mut self, out: &mut Vec<Event>) {
        self.rx_muted = false;
        out.push(Event::GroupRxUnmuted {
            id: self.config.id.clone(),
        });
    }

    pub fn set_rx_volume(&mut self, left: u8, right: u8) {
        self.rx_volume = (left, right);
    }

    pub fn set_rx_tag(&mut self, tag: u16) {
        self.rx_tag = tag;
    }

    // ── Timers ───────────────────────────────────────────────────────────────

    pub fn housekeeping(&mut self, ctx: &Ctx, out: &mut Vec<Event>) {
        if !self.is_joined() {
            return;
        }
        let id = self.config.id.clone();

        if let Some(max) = self.max_tx {
            for claim in self.floor.expire_local(max, ctx.now) {
                tracing::info!(group = %id, alias = %claim.talker.alias, "max transmit time exceeded");
                out.push(Event::GroupMaxTxTimeExceeded { id: id.clone() });
                if let Err(e) = self.send_floor(ctx, FrameKind::FloorRelease, &claim.talker, claim.priority) {
                    tracing::debug!(group = %id, error = %e, "floor release not sent");
                }
                self.timeline_end(ctx, spurt(&claim.talker, Direction::Outbound), out);
            }
        }

        for claim in self.floor.due_for_refresh(FLOOR_REFRESH, ctx.now) {
            if let Err(e) = self.send_floor(ctx, FrameKind::FloorClaim, &claim.talker, claim.priority) {
                tracing::debug!(group = %id, error = %e, "floor refresh not sent");
            }
        }

        let before = self.floor.remote_talkers();
        for claim in self.floor.expire_remote(REMOTE_CLAIM_TIMEOUT, ctx.now) {
            self.timeline_end(ctx, spurt(&claim.talker, Direction::Inbound), out);
        }
        self.emit_speakers(before, out);

        let gone = self.presence.expire(self.node_ttl, ctx.now);
        self.forget(gone, out);

        let due = self
            .last_presence
            .map_or(true, |t| ctx.now.duration_since(t) >= self.presence_every);
        if due && !self.config.presence.listen_only {
            if let Err(e) = self.announce(ctx) {
                tracing::debug!(group = %id, error = %e, "presence not sent");
            }
            self.last_presence = Some(ctx.now);
        }
    }

    /// Apply timeline quotas. Returns the number of events removed.
    pub fn groom(&mut self, policy: &TimelinePolicy, now_ms: u64) -> usize {
        self.timeline.groom(policy, now_ms)
    }

    pub fn query_timeline(&self, query: &TimelineQuery, out: &mut Vec<Event>) {
        let id = self.config.id.clone();
        if !self.timeline_enabled {
            out.push(Event::GroupTimelineReportFailed { id });
            return;
        }
        let report = self.timeline.query(&id, query);
        out.push(Event::GroupTimelineReport { id, report });
    }

    // ── Inbound presence and floor ───────────────────────────────────────────

    pub(crate) fn on_presence(&mut self, ctx: &Ctx, sender: NodeId, payload: &[u8], out: &mut Vec<Event>) {
        let mut descriptor: PresenceDescriptor = match serde_json::from_slice(payload) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(group = %self.config.id, error = %e, "bad presence descriptor");
                return;
            }
        };
        descriptor.identity.node_id = hex::encode(sender);
        let asset = descriptor.asset;
        let id = self.config.id.clone();

        match self.presence.observe(sender, descriptor, ctx.now) {
            PresenceChange::Discovered(node) => {
                tracing::info!(group = %id, node = hex::encode(sender), asset, "discovered");
                out.push(if asset {
                    Event::GroupAssetDiscovered { id, node }
                } else {
                    Event::GroupNodeDiscovered { id, node }
                });
            }
            PresenceChange::Rediscovered(node) => {
                out.push(if asset {
                    Event::GroupAssetRediscovered { id, node }
                } else {
                    Event::GroupNodeRediscovered { id, node }
                });
            }
            PresenceChange::Refreshed => {}
        }
        self.check_member_count(out);
    }

    pub(crate) fn on_depart(&mut self, ctx: &Ctx, sender: NodeId, out: &mut Vec<Event>) {
        let before = self.floor.remote_talkers();
        for claim in self.floor.release_where(|c| !c.local && c.talker.node_id == sender) {
            self.timeline_end(ctx, spurt(&claim.talker, Direction::Inbound), out);
        }
        self.emit_speakers(before, out);

        if let Some(entry) = self.presence.depart(&sender) {
            self.forget(vec![entry], out);
        }
    }

    pub(crate) fn on_floor(
        &mut self,
        ctx: &Ctx,
        kind: FrameKind,
        sender: NodeId,
        priority: u8,
        payload: &[u8],
        out: &mut Vec<Event>,
    ) {
        let info: TalkerInformation = match serde_json::from_slice(payload) {
            Ok(i) => i,
            Err(e) => {
                tracing::warn!(group = %self.config.id, error = %e, "bad floor payload");
                return;
            }
        };
        let talker = Talker::new(sender, info.alias);
        let before = self.floor.remote_talkers();

        if kind == FrameKind::FloorRelease {
            if self.floor.release(&talker).is_some() {
                self.timeline_end(ctx, spurt(&talker, Direction::Inbound), out);
            }
            self.emit_speakers(before, out);
            return;
        }

        match self.floor.request(talker.clone(), priority, false, ctx.now) {
            ClaimOutcome::AlreadyHeld => {}
            ClaimOutcome::Denied { .. } => {
                tracing::debug!(
                    group = %self.config.id,
                    node = hex::encode(sender),
                    priority,
                    "remote floor claim lost arbitration"
                );
            }
            ClaimOutcome::Granted { preempted } => {
                self.on_preempted(ctx, preempted, out);
                self.timeline_begin(ctx, spurt(&talker, Direction::Inbound), out);
                self.emit_speakers(before, out);
            }
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    /// Seal (if encrypted) and send one frame.
    pub(crate) fn send(
        &self,
        ctx: &Ctx,
        kind: FrameKind,
        payload: Vec<u8>,
        priority: u8,
    ) -> Result<(), SendError> {
        let mut frame = Frame::new(kind, self.hash, ctx.local.node_id, payload).with_priority(priority);
        if let Some(cipher) = &self.cipher {
            cipher.seal(&mut frame)?;
        }
        ctx.transport.send(&self.config.id, &frame)?;
        Ok(())
    }

    fn announce(&self, ctx: &Ctx) -> Result<(), SendError> {
        let payload = serde_json::to_vec(&ctx.local.descriptor())
            .map_err(|e| SendError::Payload(e.to_string()))?;
        self.send(ctx, FrameKind::Presence, payload, 0)
    }

    fn send_floor(&self, ctx: &Ctx, kind: FrameKind, talker: &Talker, priority: u8) -> Result<(), SendError> {
        let payload =
            serde_json::to_vec(&talker.info()).map_err(|e| SendError::Payload(e.to_string()))?;
        self.send(ctx, kind, payload, priority)
    }

    /// End every local claim with GroupTxEnded, optionally telling the group.
    fn end_local_claims(&mut self, ctx: &Ctx, notify: bool, out: &mut Vec<Event>) {
        let ended = self.floor.release_local();
        if ended.is_empty() {
            return;
        }
        for claim in &ended {
            if notify {
                if let Err(e) = self.send_floor(ctx, FrameKind::FloorRelease, &claim.talker, claim.priority) {
                    tracing::debug!(group = %self.config.id, error = %e, "floor release not sent");
                }
            }
            self.timeline_end(ctx, spurt(&claim.talker, Direction::Outbound), out);
        }
        out.push(Event::GroupTxEnded {
            id: self.config.id.clone(),
        });
    }

    /// Forget remote talkers and discovered entries, e.g. on leave.
    fn drop_remote_state(&mut self, ctx: &Ctx, out: &mut Vec<Event>) {
        let before = self.floor.remote_talkers();
        for claim in self.floor.release_remote() {
            self.timeline_end(ctx, spurt(&claim.talker, Direction::Inbound), out);
        }
        self.emit_speakers(before, out);
        for ev in self.timeline.end_all(ctx.now_ms) {
            out.push(Event::GroupTimelineEventEnded {
                id: self.config.id.clone(),
                timeline_event: ev,
            });
        }
        let gone = self.presence.clear();
        self.forget(gone, out);
    }

    fn on_preempted(&mut self, ctx: &Ctx, preempted: Vec<Claim>, out: &mut Vec<Event>) {
        for claim in preempted {
            if claim.local {
                tracing::info!(group = %self.config.id, alias = %claim.talker.alias, "transmit preempted");
                out.push(Event::GroupTxUsurpedByPriority {
                    id: self.config.id.clone(),
                });
                // Members that granted this claim first still list it.
                if let Err(e) = self.send_floor(ctx, FrameKind::FloorRelease, &claim.talker, claim.priority) {
                    tracing::debug!(group = %self.config.id, error = %e, "floor release not sent");
                }
                self.timeline_end(ctx, spurt(&claim.talker, Direction::Outbound), out);
            } else {
                self.timeline_end(ctx, spurt(&claim.talker, Direction::Inbound), out);
            }
        }
    }

    /// Post receive-side events if the remote talker list changed.
    fn emit_speakers(&self, before: Vec<TalkerInformation>, out: &mut Vec<Event>) {
        let after = self.floor.remote_talkers();
        if before == after {
            return;
        }
        let id = self.config.id.clone();
        if before.is_empty() {
            out.push(Event::GroupRxStarted { id: id.clone() });
        }
        let ended = after.is_empty();
        out.push(Event::GroupRxSpeakersChanged {
            id: id.clone(),
            talkers: talkgroup_core::group::GroupTalkers { list: after },
        });
        if ended {
            out.push(Event::GroupRxEnded { id });
        }
    }

    fn forget(&mut self, gone: Vec<PresenceEntry>, out: &mut Vec<Event>) {
        for entry in gone {
            let id = self.config.id.clone();
            tracing::info!(group = %id, node = hex::encode(entry.node_id), "undiscovered");
            out.push(if entry.is_asset() {
                Event::GroupAssetUndiscovered {
                    id,
                    node: entry.descriptor,
                }
            } else {
                Event::GroupNodeUndiscovered {
                    id,
                    node: entry.descriptor,
                }
            });
        }
        self.check_member_count(out);
    }

    fn check_member_count(&mut self, out: &mut Vec<Event>) {
        let count = self.presence.member_count();
        if count != self.last_member_count {
            self.last_member_count = count;
            out.push(Event::GroupMemberCountChanged {
                id: self.config.id.clone(),
                count,
            });
        }
    }

    pub(crate) fn timeline_begin(&mut self, ctx: &Ctx, key: SpurtKey, out: &mut Vec<Event>) {
        if !self.timeline_enabled {
            return;
        }
        let event = self.timeline.begin(key, ctx.now_ms);
        out.push(Event::GroupTimelineEventStarted {
            id: self.config.id.clone(),
            timeline_event: event,
        });
    }

    pub(crate) fn timeline_record(&mut self, ctx: &Ctx, key: &SpurtKey, bytes: usize, out: &mut Vec<Event>) {
        if !self.timeline_enabled {
            return;
        }
        if let Some(event) = self.timeline.record(key, bytes, ctx.now_ms) {
            out.push(Event::GroupTimelineEventUpdated {
                id: self.config.id.clone(),
                timeline_event: event,
            });
        }
    }

    fn timeline_end(&mut self, ctx: &Ctx, key: SpurtKey, out: &mut Vec<Event>) {
        if !self.timeline_enabled {
            return;
        }
        if let Some(event) = self.timeline.end(&key, ctx.now_ms) {
            out.push(Event::GroupTimelineEventEnded {
                id: self.config.id.clone(),
                timeline_event: event,
            });
        }
    }
}

pub(crate) fn spurt(talker: &Talker, direction: Direction) -> SpurtKey {
    SpurtKey {
        direction,
        node_id: hex::encode(talker.node_id),
        alias: talker.alias.clone(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
