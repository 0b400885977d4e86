//! Transport seam — how the engine reaches other group members.
//!
//! The engine opens one link per joined group and sends whole frames on it.
//! Inbound frames and link changes come back on the channel handed to
//! [`Transport::open`]. [`LoopbackHub`] wires any number of engines together
//! in-process.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::mpsc;

use talkgroup_core::group::GroupConfig;
use talkgroup_core::wire::{Frame, WireError};

/// Rallypoint link state changes reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RallypointStatus {
    Connecting,
    Connected,
    Disconnected,
    PausingConnectionAttempt,
    Roundtrip { rt_ms: u32 },
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    Frame { group_id: String, frame: Frame },
    /// The group's link failed and will not recover by itself.
    LinkLost { group_id: String },
    Rallypoint { id: String, status: RallypointStatus },
}

pub type TransportSink = mpsc::UnboundedSender<TransportEvent>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("group {0} is not open")]
    NotOpen(String),
    #[error("group {0} refused: {1}")]
    Refused(String, String),
    #[error("wire: {0}")]
    Wire(#[from] WireError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// A way to move frames between group members.
///
/// Methods are synchronous and must not block; implementations that need
/// async I/O spawn their own tasks.
pub trait Transport: Send + Sync {
    /// Open the group's link. Inbound frames go to `sink`.
    fn open(&self, group: &GroupConfig, sink: TransportSink) -> Result<(), TransportError>;

    /// Close the group's link. Closing an unopened group is a no-op.
    fn close(&self, group_id: &str);

    fn send(&self, group_id: &str, frame: &Frame) -> Result<(), TransportError>;
}

// ── Loopback ──────────────────────────────────────────────────────────────────

struct Endpoint {
    endpoint: u64,
    sink: TransportSink,
}

/// In-process medium shared by [`LoopbackTransport`]s.
///
/// Frames are encoded and decoded on the way through so every delivery
/// exercises the wire format.
#[derive(Default)]
pub struct LoopbackHub {
    /// group id -> endpoints with the group open
    groups: DashMap<String, Vec<Endpoint>>,
    next_endpoint: AtomicU64,
    refused: Mutex<HashSet<String>>,
    silenced: Mutex<HashSet<String>>,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A transport for one engine attached to this hub.
    pub fn transport(self: &Arc<Self>) -> Arc<LoopbackTransport> {
        let endpoint = self.next_endpoint.fetch_add(1, Ordering::Relaxed);
        Arc::new(LoopbackTransport {
            hub: self.clone(),
            endpoint,
        })
    }

    /// Make every later `open` of `group_id` fail.
    pub fn refuse(&self, group_id: &str) {
        if let Ok(mut refused) = self.refused.lock() {
            refused.insert(group_id.to_string());
        }
    }

    /// Make sends on `group_id` fail while still letting it open.
    pub fn silence(&self, group_id: &str) {
        if let Ok(mut silenced) = self.silenced.lock() {
            silenced.insert(group_id.to_string());
        }
    }

    /// Drop the group's medium: every open endpoint gets `LinkLost`.
    pub fn sever(&self, group_id: &str) {
        if let Some((_, endpoints)) = self.groups.remove(group_id) {
            for ep in endpoints {
                let _ = ep.sink.send(TransportEvent::LinkLost {
                    group_id: group_id.to_string(),
                });
            }
        }
    }

    pub fn members(&self, group_id: &str) -> usize {
        self.groups.get(group_id).map(|e| e.len()).unwrap_or(0)
    }

    fn is_listed(set: &Mutex<HashSet<String>>, group_id: &str) -> bool {
        set.lock().map(|s| s.contains(group_id)).unwrap_or(false)
    }
}

pub struct LoopbackTransport {
    hub: Arc<LoopbackHub>,
    endpoint: u64,
}

impl Transport for LoopbackTransport {
    fn open(&self, group: &GroupConfig, sink: TransportSink) -> Result<(), TransportError> {
        if LoopbackHub::is_listed(&self.hub.refused, &group.id) {
            return Err(TransportError::Refused(group.id.clone(), "refused by hub".into()));
        }
        let mut endpoints = self.hub.groups.entry(group.id.clone()).or_default();
        endpoints.retain(|e| e.endpoint != self.endpoint);
        endpoints.push(Endpoint {
            endpoint: self.endpoint,
            sink,
        });
        Ok(())
    }

    fn close(&self, group_id: &str) {
        if let Some(mut endpoints) = self.hub.groups.get_mut(group_id) {
            endpoints.retain(|e| e.endpoint != self.endpoint);
        }
    }

    fn send(&self, group_id: &str, frame: &Frame) -> Result<(), TransportError> {
        if LoopbackHub::is_listed(&self.hub.silenced, group_id) {
            return Err(TransportError::Refused(group_id.to_string(), "silenced".into()));
        }
        let endpoints = self
            .hub
            .groups
            .get(group_id)
            .ok_or_else(|| TransportError::NotOpen(group_id.to_string()))?;
        if !endpoints.iter().any(|e| e.endpoint == self.endpoint) {
            return Err(TransportError::NotOpen(group_id.to_string()));
        }

        let bytes = frame.encode()?;
        for ep in endpoints.iter().filter(|e| e.endpoint != self.endpoint) {
            let frame = Frame::decode(&bytes)?;
            let _ = ep.sink.send(TransportEvent::Frame {
                group_id: group_id.to_string(),
                frame,
            });
        }
        Ok(())
    }
}
