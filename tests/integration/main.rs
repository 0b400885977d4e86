//! Talkgroup integration test harness.
//!
//! Every test wires several engines together through one in-process
//! [`LoopbackHub`] and drives them only through the public engine API,
//! observing the results as bus events.
//!
//!   cargo test --test integration

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::mpsc;
use tokio::time::Instant;

use talkgroup_core::config::EnginePolicy;
use talkgroup_core::group::{Identity, PresenceSettings};
use talkgroup_core::{EngineResult, Event, GroupConfig};
use talkgroup_engine::{Engine, LoopbackHub, SubscriptionHandle, TopicFilter};

mod delivery;
mod discovery;
mod encryption;
mod floor;
mod lifecycle;
mod timeline;

// ── Harness ───────────────────────────────────────────────────────────────────

/// How long a test waits for an expected event.
pub const EVENT_WAIT: Duration = Duration::from_secs(5);

/// How long a test watches for an event that must not arrive.
pub const QUIET_WAIT: Duration = Duration::from_millis(400);

/// One engine on the shared hub plus everything it has posted.
pub struct Node {
    pub engine: Engine,
    pub id: String,
    events: mpsc::UnboundedReceiver<Event>,
    _subscription: SubscriptionHandle,
}

impl Node {
    /// Initialize and start an engine whose node id is `n` repeated.
    pub async fn start(hub: &Arc<LoopbackHub>, n: u8) -> Node {
        Self::start_with(hub, n, EnginePolicy::default()).await
    }

    pub async fn start_with(hub: &Arc<LoopbackHub>, n: u8, policy: EnginePolicy) -> Node {
        let engine = Engine::new(hub.transport());
        let (subscription, events) = engine.bus().subscribe_channel(TopicFilter::All);
        let id = format!("{n:02x}").repeat(8);
        let identity = Identity {
            node_id: id.clone(),
            user_id: format!("user-{n}"),
            display_name: format!("node-{n}"),
        };
        assert_eq!(engine.initialize(policy, identity, None), EngineResult::Ok);
        assert_eq!(engine.start(), EngineResult::Ok);

        let mut node = Node {
            engine,
            id,
            events,
            _subscription: subscription,
        };
        node.expect("engine_started", |e| *e == Event::EngineStarted).await;
        node
    }

    /// Create `config` and join it, waiting for GroupJoined.
    pub async fn join(&mut self, config: GroupConfig) {
        let id = config.id.clone();
        assert_eq!(self.engine.create_group(config), EngineResult::Ok);
        assert_eq!(self.engine.join_group(&id), EngineResult::Ok);
        self.expect("group_joined", |e| *e == Event::GroupJoined { id: id.clone() })
            .await;
    }

    /// Wait for the first event matching `pred`, skipping everything else.
    pub async fn expect(&mut self, what: &str, pred: impl Fn(&Event) -> bool) -> Event {
        match self.try_expect(EVENT_WAIT, &pred).await {
            Ok(event) => event,
            Err(e) => panic!("node {}: {what}: {e}", self.id),
        }
    }

    /// Fail if an event matching `pred` arrives within [`QUIET_WAIT`].
    pub async fn expect_none(&mut self, what: &str, pred: impl Fn(&Event) -> bool) {
        if let Ok(event) = self.try_expect(QUIET_WAIT, &pred).await {
            panic!("node {}: unexpected {what}: {event:?}", self.id);
        }
    }

    /// Names of every event already posted, in order.
    pub fn drain(&mut self) -> Vec<String> {
        let mut names = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            names.push(event.name().to_string());
        }
        names
    }

    async fn try_expect(&mut self, wait: Duration, pred: &impl Fn(&Event) -> bool) -> Result<Event> {
        let deadline = Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) if pred(&event) => return Ok(event),
                Ok(Some(_)) => continue,
                Ok(None) => bail!("event bus closed"),
                Err(_) => bail!("timed out after {wait:?}"),
            }
        }
    }
}

/// A plain audio group with a fast presence interval.
pub fn group(id: &str) -> GroupConfig {
    GroupConfig {
        id: id.into(),
        alias: "unit".into(),
        presence: PresenceSettings {
            interval_secs: 1,
            listen_only: false,
        },
        ..GroupConfig::default()
    }
}

/// Start `count` nodes (ids 1..=count) and join each to `config`, waiting
/// until every node has discovered every other.
pub async fn joined_nodes(hub: &Arc<LoopbackHub>, config: &GroupConfig, count: u8) -> Vec<Node> {
    let mut nodes = Vec::new();
    for n in 1..=count {
        let mut node = Node::start(hub, n).await;
        node.join(config.clone()).await;
        nodes.push(node);
    }
    let id = config.id.clone();
    for node in nodes.iter_mut() {
        let want = count as usize;
        node.expect("full membership", |e| {
            matches!(e, Event::GroupMemberCountChanged { id: g, count } if *g == id && *count == want)
        })
        .await;
    }
    nodes
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_engine_result_codes_before_start() {
    let hub = LoopbackHub::new();
    let engine = Engine::new(hub.transport());
    assert_eq!(engine.join_group("g"), EngineResult::NotInitialized);
    assert_eq!(engine.shutdown().await, EngineResult::NotInitialized);

    engine.initialize(EnginePolicy::default(), Identity::default(), None);
    assert_eq!(engine.create_group(group("g")), EngineResult::GeneralFailure);
    assert!(engine.node_id().is_some_and(|id| id.len() == 16));
    assert_eq!(engine.shutdown().await, EngineResult::Ok);
}
