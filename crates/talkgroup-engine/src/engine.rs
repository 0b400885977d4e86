//! The engine — command surface, group table and background tasks.
//!
//! Commands return an [`EngineResult`] immediately and are executed in order
//! by a single worker task; their outcomes arrive as events on the bus. A
//! receive task feeds transport traffic into the sessions, and a housekeeping
//! task drives the timers. Each group lives behind its own mutex, so work on
//! different groups never contends.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use talkgroup_core::biometrics::{self, Series};
use talkgroup_core::config::EnginePolicy;
use talkgroup_core::crypto::{generate_node_id, parse_node_id, CryptoError};
use talkgroup_core::group::{
    validate_volume, BlobInfo, BlobPayloadType, GroupConfig, Identity, RtpHeader, TimelineQuery,
    TxParams, MAX_ALIAS_LEN,
};
use talkgroup_core::wire::NodeId;
use talkgroup_core::{EngineResult, Event, LicensingStatus};

use crate::bus::{EventBus, Handler, SubscriptionHandle, TopicFilter};
use crate::license::{License, LicenseMonitor};
use crate::session::{Ctx, GroupSession, GroupStatus, LocalNode};
use crate::transport::{RallypointStatus, Transport, TransportEvent, TransportSink};

/// Timer resolution for presence, floor refresh and expiry checks.
pub const HOUSEKEEPING_TICK: Duration = Duration::from_millis(250);

/// File under the storage path holding the persisted node id.
const NODE_ID_FILE: &str = "node_id";

enum Command {
    Post(Event),
    Delete(String),
    Join(String),
    Leave(String),
    BeginTx(String, TxParams),
    EndTx(String),
    MuteRx(String),
    UnmuteRx(String),
    SetRxVolume(String, u8, u8),
    SetRxTag(String, u16),
    SendBlob(String, BlobInfo, Bytes),
    SendRtp(String, RtpHeader, Bytes),
    SendRaw(String, Bytes),
    QueryTimeline(String, TimelineQuery),
    Stop,
    Shutdown(oneshot::Sender<()>),
}

/// State shared by the worker, receive and housekeeping tasks.
struct Shared {
    bus: Arc<EventBus>,
    transport: Arc<dyn Transport>,
    groups: DashMap<String, Arc<Mutex<GroupSession>>>,
    local: LocalNode,
    policy: EnginePolicy,
    sink: TransportSink,
    license: StdMutex<LicenseMonitor>,
    started: AtomicBool,
}

struct Runtime {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    bus: Arc<EventBus>,
    transport: Arc<dyn Transport>,
    runtime: StdMutex<Option<Runtime>>,
    dispatcher: StdMutex<Option<JoinHandle<()>>>,
}

/// Handle to one engine instance. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                bus: Arc::new(EventBus::new()),
                transport,
                runtime: StdMutex::new(None),
                dispatcher: StdMutex::new(None),
            }),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn subscribe(&self, filter: TopicFilter, handler: Handler) -> SubscriptionHandle {
        self.inner.bus.subscribe(filter, handler)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.inner.bus.unsubscribe(handle)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Spawn the engine's tasks. Must be called from within a tokio runtime.
    pub fn initialize(
        &self,
        policy: EnginePolicy,
        identity: Identity,
        storage_path: Option<&Path>,
    ) -> EngineResult {
        let mut runtime = lock(&self.inner.runtime);
        if runtime.is_some() {
            return EngineResult::AlreadyInitialized;
        }

        let node_id = match resolve_node_id(&identity, storage_path) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "bad node id");
                return EngineResult::InvalidParameters;
            }
        };
        let local = LocalNode::new(node_id, identity);
        tracing::info!(node = %local.hex_id(), "engine initializing");

        {
            let mut dispatcher = lock(&self.inner.dispatcher);
            if dispatcher.is_none() {
                *dispatcher = self.inner.bus.spawn_dispatcher();
            }
        }

        let (sink, inbound) = mpsc::unbounded_channel();
        let (commands, queue) = mpsc::unbounded_channel();
        let license = LicenseMonitor::from_config(&policy.licensing, unix_secs());
        let shared = Arc::new(Shared {
            bus: self.inner.bus.clone(),
            transport: self.inner.transport.clone(),
            groups: DashMap::new(),
            local,
            policy,
            sink,
            license: StdMutex::new(license),
            started: AtomicBool::new(false),
        });

        let tasks = vec![
            tokio::spawn(worker_loop(shared.clone(), queue)),
            tokio::spawn(receive_loop(shared.clone(), inbound)),
            tokio::spawn(housekeeping_loop(shared.clone())),
        ];
        *runtime = Some(Runtime {
            shared,
            commands,
            tasks,
        });
        EngineResult::Ok
    }

    pub fn start(&self) -> EngineResult {
        let runtime = lock(&self.inner.runtime);
        let Some(rt) = runtime.as_ref() else {
            return EngineResult::NotInitialized;
        };
        if rt.shared.started.swap(true, Ordering::SeqCst) {
            return EngineResult::Ok;
        }
        tracing::info!("engine started");
        enqueue(rt, Command::Post(Event::EngineStarted))
    }

    /// Leave every joined group, then post EngineStopped.
    pub fn stop(&self) -> EngineResult {
        let runtime = lock(&self.inner.runtime);
        let Some(rt) = runtime.as_ref() else {
            return EngineResult::NotInitialized;
        };
        if !rt.shared.started.swap(false, Ordering::SeqCst) {
            return EngineResult::GeneralFailure;
        }
        enqueue(rt, Command::Stop)
    }

    /// Stop, delete every group and release the engine's tasks. The engine
    /// can be initialized again afterwards.
    pub async fn shutdown(&self) -> EngineResult {
        let (done_tx, done_rx) = oneshot::channel();
        {
            let runtime = lock(&self.inner.runtime);
            let Some(rt) = runtime.as_ref() else {
                return EngineResult::NotInitialized;
            };
            if rt.shared.started.swap(false, Ordering::SeqCst) {
                let _ = rt.commands.send(Command::Stop);
            }
            let _ = rt.commands.send(Command::Shutdown(done_tx));
        }
        let _ = done_rx.await;

        let runtime = lock(&self.inner.runtime).take();
        if let Some(rt) = runtime {
            for task in rt.tasks {
                task.abort();
            }
        }
        tracing::info!("engine shut down");
        EngineResult::Ok
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.inner.runtime).is_some()
    }

    pub fn is_started(&self) -> bool {
        lock(&self.inner.runtime)
            .as_ref()
            .is_some_and(|rt| rt.shared.started.load(Ordering::SeqCst))
    }

    /// This engine's node id (hex), once initialized.
    pub fn node_id(&self) -> Option<String> {
        lock(&self.inner.runtime)
            .as_ref()
            .map(|rt| rt.shared.local.hex_id())
    }

    // ── Groups ───────────────────────────────────────────────────────────────

    pub fn create_group(&self, config: GroupConfig) -> EngineResult {
        let runtime = lock(&self.inner.runtime);
        let rt = match started(&runtime) {
            Ok(rt) => rt,
            Err(result) => return result,
        };
        if let Err(e) = config.validate() {
            tracing::warn!(group = %config.id, error = %e, "invalid group config");
            return EngineResult::InvalidParameters;
        }

        let id = config.id.clone();
        let event = match rt.shared.groups.entry(id.clone()) {
            Entry::Occupied(_) => {
                tracing::warn!(group = %id, "group already exists");
                Event::GroupCreateFailed { id }
            }
            Entry::Vacant(slot) => match GroupSession::new(config, &rt.shared.policy) {
                Ok(session) => {
                    slot.insert(Arc::new(Mutex::new(session)));
                    tracing::info!(group = %id, "group created");
                    Event::GroupCreated { id }
                }
                Err(e) => {
                    tracing::warn!(group = %id, error = %e, "group cipher unavailable");
                    Event::GroupCreateFailed { id }
                }
            },
        };
        enqueue(rt, Command::Post(event))
    }

    /// Create a group from its JSON configuration.
    pub fn create_group_json(&self, json: &str) -> EngineResult {
        match GroupConfig::from_json(json) {
            Ok(config) => self.create_group(config),
            Err(e) => {
                tracing::warn!(error = %e, "invalid group config JSON");
                EngineResult::InvalidParameters
            }
        }
    }

    /// Delete a group, ending any local transmit first.
    pub fn delete_group(&self, id: &str) -> EngineResult {
        self.submit(id, Command::Delete(id.to_string()))
    }

    pub fn join_group(&self, id: &str) -> EngineResult {
        self.submit(id, Command::Join(id.to_string()))
    }

    pub fn leave_group(&self, id: &str) -> EngineResult {
        self.submit(id, Command::Leave(id.to_string()))
    }

    pub fn begin_tx(&self, id: &str, priority: u8, flags: u16) -> EngineResult {
        self.begin_tx_advanced(id, TxParams::new(priority, flags))
    }

    pub fn begin_tx_advanced(&self, id: &str, params: TxParams) -> EngineResult {
        if params.alias.len() > MAX_ALIAS_LEN {
            return EngineResult::InvalidParameters;
        }
        self.submit(id, Command::BeginTx(id.to_string(), params))
    }

    pub fn end_tx(&self, id: &str) -> EngineResult {
        self.submit(id, Command::EndTx(id.to_string()))
    }

    pub fn mute_rx(&self, id: &str) -> EngineResult {
        self.submit(id, Command::MuteRx(id.to_string()))
    }

    pub fn unmute_rx(&self, id: &str) -> EngineResult {
        self.submit(id, Command::UnmuteRx(id.to_string()))
    }

    pub fn set_rx_volume(&self, id: &str, left: u8, right: u8) -> EngineResult {
        if validate_volume(left, right).is_err() {
            return EngineResult::InvalidParameters;
        }
        self.submit(id, Command::SetRxVolume(id.to_string(), left, right))
    }

    pub fn set_rx_tag(&self, id: &str, tag: u16) -> EngineResult {
        self.submit(id, Command::SetRxTag(id.to_string(), tag))
    }

    pub fn send_blob(&self, id: &str, info: BlobInfo, blob: Bytes) -> EngineResult {
        self.submit(id, Command::SendBlob(id.to_string(), info, blob))
    }

    /// Encode `series` and send them as a biometrics blob. An empty `target`
    /// addresses every member.
    pub fn send_biometrics(&self, id: &str, target: &str, series: &[Series]) -> EngineResult {
        let blob = match biometrics::encode(series) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::debug!(group = %id, error = %e, "biometrics not encoded");
                return EngineResult::InvalidParameters;
            }
        };
        let info = BlobInfo {
            target: target.to_string(),
            ..BlobInfo::new(BlobPayloadType::Biometrics)
        };
        self.send_blob(id, info, Bytes::from(blob))
    }

    pub fn send_rtp(&self, id: &str, header: RtpHeader, payload: Bytes) -> EngineResult {
        if header.validate().is_err() {
            return EngineResult::InvalidParameters;
        }
        self.submit(id, Command::SendRtp(id.to_string(), header, payload))
    }

    pub fn send_raw(&self, id: &str, raw: Bytes) -> EngineResult {
        self.submit(id, Command::SendRaw(id.to_string(), raw))
    }

    /// The report, or GroupTimelineReportFailed for an unknown group, arrives
    /// as an event.
    pub fn query_timeline(&self, id: &str, query: TimelineQuery) -> EngineResult {
        let runtime = lock(&self.inner.runtime);
        match started(&runtime) {
            Ok(rt) => enqueue(rt, Command::QueryTimeline(id.to_string(), query)),
            Err(result) => result,
        }
    }

    /// Status of one group, or None if it does not exist.
    pub async fn group_status(&self, id: &str) -> Option<GroupStatus> {
        let group = {
            let runtime = lock(&self.inner.runtime);
            runtime.as_ref()?.shared.group(id)?
        };
        let session = group.lock().await;
        Some(session.status())
    }

    /// Status of every group, sorted by id.
    pub async fn groups(&self) -> Vec<GroupStatus> {
        let groups: Vec<Arc<Mutex<GroupSession>>> = match lock(&self.inner.runtime).as_ref() {
            Some(rt) => rt.shared.groups.iter().map(|e| e.value().clone()).collect(),
            None => return Vec::new(),
        };
        let mut statuses = Vec::with_capacity(groups.len());
        for group in groups {
            statuses.push(group.lock().await.status());
        }
        statuses.sort_by(|a, b| a.descriptor.id.cmp(&b.descriptor.id));
        statuses
    }

    // ── Licensing ────────────────────────────────────────────────────────────

    pub fn update_license(
        &self,
        entitlement: &str,
        key: &str,
        activation_code: &str,
    ) -> LicensingStatus {
        let runtime = lock(&self.inner.runtime);
        let Some(rt) = runtime.as_ref() else {
            return LicensingStatus::NotInitialized;
        };
        let status = lock(&rt.shared.license).update(entitlement, key, activation_code, unix_secs());
        if status == LicensingStatus::Ok && rt.commands.send(Command::Post(Event::LicenseChanged)).is_err() {
            return LicensingStatus::GeneralFailure;
        }
        status
    }

    pub fn license(&self) -> Option<License> {
        let runtime = lock(&self.inner.runtime);
        let rt = runtime.as_ref()?;
        let monitor = lock(&rt.shared.license);
        monitor.license().cloned()
    }

    /// Queue a command addressed to an existing group.
    fn submit(&self, id: &str, command: Command) -> EngineResult {
        let runtime = lock(&self.inner.runtime);
        let rt = match started(&runtime) {
            Ok(rt) => rt,
            Err(result) => return result,
        };
        if !rt.shared.groups.contains_key(id) {
            tracing::debug!(group = %id, "command for unknown group");
            return EngineResult::InvalidParameters;
        }
        enqueue(rt, command)
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn started(runtime: &Option<Runtime>) -> Result<&Runtime, EngineResult> {
    let rt = runtime.as_ref().ok_or(EngineResult::NotInitialized)?;
    if !rt.shared.started.load(Ordering::SeqCst) {
        return Err(EngineResult::GeneralFailure);
    }
    Ok(rt)
}

fn enqueue(rt: &Runtime, command: Command) -> EngineResult {
    match rt.commands.send(command) {
        Ok(()) => EngineResult::Ok,
        Err(_) => {
            tracing::error!("engine worker is gone");
            EngineResult::GeneralFailure
        }
    }
}

/// Configured id, else the id persisted under `storage_path`, else a fresh
/// one (persisted when a storage path is given).
fn resolve_node_id(
    identity: &Identity,
    storage_path: Option<&Path>,
) -> Result<NodeId, CryptoError> {
    if !identity.node_id.is_empty() {
        return parse_node_id(&identity.node_id);
    }
    let Some(dir) = storage_path else {
        return Ok(generate_node_id());
    };

    let file = dir.join(NODE_ID_FILE);
    if let Ok(text) = std::fs::read_to_string(&file) {
        match parse_node_id(text.trim()) {
            Ok(id) => return Ok(id),
            Err(e) => tracing::warn!(path = %file.display(), error = %e, "ignoring stored node id"),
        }
    }

    let id = generate_node_id();
    let written = std::fs::create_dir_all(dir).and_then(|()| std::fs::write(&file, hex::encode(id)));
    if let Err(e) = written {
        tracing::warn!(path = %file.display(), error = %e, "node id not persisted");
    }
    Ok(id)
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn unix_secs() -> u64 {
    unix_millis() / 1000
}

/// Link quality 0..=100 from a roundtrip time: full marks up to 50 ms,
/// falling linearly to zero at one second.
pub fn roundtrip_rating(rt_ms: u32) -> u32 {
    match rt_ms {
        0..=50 => 100,
        51..=999 => 100 - (rt_ms - 50) * 100 / 950,
        _ => 0,
    }
}

fn rallypoint_event(id: String, status: RallypointStatus) -> Event {
    match status {
        RallypointStatus::Connecting => Event::RallypointConnecting { id },
        RallypointStatus::Connected => Event::RallypointConnected { id },
        RallypointStatus::Disconnected => Event::RallypointDisconnected { id },
        RallypointStatus::PausingConnectionAttempt => Event::RallypointPausingConnectionAttempt { id },
        RallypointStatus::Roundtrip { rt_ms } => Event::RallypointRoundtripReport {
            id,
            rt_ms,
            rt_rating: roundtrip_rating(rt_ms),
        },
    }
}

impl Shared {
    fn ctx(&self) -> Ctx<'_> {
        Ctx {
            transport: self.transport.as_ref(),
            sink: &self.sink,
            local: &self.local,
            now: Instant::now(),
            now_ms: unix_millis(),
        }
    }

    fn group(&self, id: &str) -> Option<Arc<Mutex<GroupSession>>> {
        self.groups.get(id).map(|g| g.value().clone())
    }

    /// Run `f` under the group's lock and post what it produced. Events are
    /// posted before the lock is released so each group's events stay in
    /// order across tasks.
    async fn with_group<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut GroupSession, &Ctx, &mut Vec<Event>),
    {
        let Some(group) = self.group(id) else {
            tracing::debug!(group = %id, "group not found");
            return false;
        };
        let mut session = group.lock().await;
        let mut out = Vec::new();
        f(&mut *session, &self.ctx(), &mut out);
        self.post_all(out);
        true
    }

    fn post_all(&self, events: Vec<Event>) {
        for event in events {
            self.bus.post(event);
        }
    }

    async fn execute(&self, command: Command) {
        match command {
            Command::Post(event) => self.bus.post(event),
            Command::Delete(id) => self.delete(&id).await,
            Command::Join(id) => {
                self.with_group(&id, |s, ctx, out| s.join(ctx, out)).await;
            }
            Command::Leave(id) => {
                self.with_group(&id, |s, ctx, out| s.leave(ctx, out)).await;
            }
            Command::BeginTx(id, params) => {
                self.with_group(&id, |s, ctx, out| s.begin_tx(ctx, &params, out)).await;
            }
            Command::EndTx(id) => {
                self.with_group(&id, |s, ctx, out| s.end_tx(ctx, out)).await;
            }
            Command::MuteRx(id) => {
                self.with_group(&id, |s, _, out| s.mute_rx(out)).await;
            }
            Command::UnmuteRx(id) => {
                self.with_group(&id, |s, _, out| s.unmute_rx(out)).await;
            }
            Command::SetRxVolume(id, left, right) => {
                self.with_group(&id, |s, _, _| s.set_rx_volume(left, right)).await;
            }
            Command::SetRxTag(id, tag) => {
                self.with_group(&id, |s, _, _| s.set_rx_tag(tag)).await;
            }
            Command::SendBlob(id, info, blob) => {
                self.with_group(&id, |s, ctx, out| s.send_blob(ctx, info, blob, out)).await;
            }
            Command::SendRtp(id, header, payload) => {
                self.with_group(&id, |s, ctx, out| s.send_rtp(ctx, &header, &payload, out))
                    .await;
            }
            Command::SendRaw(id, raw) => {
                self.with_group(&id, |s, ctx, out| s.send_raw(ctx, &raw, out)).await;
            }
            Command::QueryTimeline(id, query) => {
                let found = self
                    .with_group(&id, |s, _, out| s.query_timeline(&query, out))
                    .await;
                if !found {
                    self.bus.post(Event::GroupTimelineReportFailed { id });
                }
            }
            Command::Stop => {
                for id in self.group_ids() {
                    self.with_group(&id, |s, ctx, out| s.leave(ctx, out)).await;
                }
                tracing::info!("engine stopped");
                self.bus.post(Event::EngineStopped);
            }
            Command::Shutdown(done) => {
                for id in self.group_ids() {
                    self.delete(&id).await;
                }
                let _ = done.send(());
            }
        }
    }

    fn group_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.groups.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    async fn delete(&self, id: &str) {
        let Some((_, group)) = self.groups.remove(id) else {
            return;
        };
        let mut session = group.lock().await;
        let mut out = Vec::new();
        session.teardown(&self.ctx(), &mut out);
        out.push(Event::GroupDeleted { id: id.to_string() });
        tracing::info!(group = %id, "group deleted");
        self.post_all(out);
    }

    async fn on_transport(&self, event: TransportEvent) {
        match event {
            TransportEvent::Frame { group_id, frame } => {
                self.with_group(&group_id, |s, ctx, out| s.on_frame(ctx, frame, out))
                    .await;
            }
            TransportEvent::LinkLost { group_id } => {
                self.with_group(&group_id, |s, ctx, out| s.link_lost(ctx, out))
                    .await;
            }
            TransportEvent::Rallypoint { id, status } => {
                self.bus.post(rallypoint_event(id, status));
            }
        }
    }

    async fn housekeeping(&self, groom: bool) {
        let groups: Vec<Arc<Mutex<GroupSession>>> =
            self.groups.iter().map(|e| e.value().clone()).collect();
        for group in groups {
            let mut session = group.lock().await;
            let mut out = Vec::new();
            let ctx = self.ctx();
            session.housekeeping(&ctx, &mut out);
            if groom {
                let removed = session.groom(&self.policy.timelines, ctx.now_ms);
                if removed > 0 {
                    tracing::debug!(group = %session.id(), removed, "timeline groomed");
                }
            }
            self.post_all(out);
        }

        let expiry = lock(&self.license).check(unix_secs());
        if let Some(event) = expiry {
            self.bus.post(event);
        }
    }
}

async fn worker_loop(shared: Arc<Shared>, mut queue: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = queue.recv().await {
        shared.execute(command).await;
    }
    tracing::debug!("engine worker stopped");
}

async fn receive_loop(shared: Arc<Shared>, mut inbound: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = inbound.recv().await {
        shared.on_transport(event).await;
    }
}

async fn housekeeping_loop(shared: Arc<Shared>) {
    let mut tick = tokio::time::interval(HOUSEKEEPING_TICK);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let groom_every = Duration::from_secs(shared.policy.timelines.grooming_interval_secs.max(1));
    let mut last_groom = Instant::now();

    loop {
        tick.tick().await;
        let groom = last_groom.elapsed() >= groom_every;
        if groom {
            last_groom = Instant::now();
        }
        shared.housekeeping(groom).await;
    }
}
