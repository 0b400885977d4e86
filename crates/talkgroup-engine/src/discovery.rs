//! Presence registry — the nodes and assets seen on one group.
//!
//! Entries are upserted from presence frames and dropped on a departure frame
//! or when they have not re-announced within the TTL.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use talkgroup_core::group::PresenceDescriptor;
use talkgroup_core::wire::NodeId;

/// Tracked state for a node or asset seen on the group.
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub node_id: NodeId,
    pub descriptor: PresenceDescriptor,
    /// Last time a presence frame arrived from this node.
    pub last_seen: Instant,
}

impl PresenceEntry {
    pub fn is_asset(&self) -> bool {
        self.descriptor.asset
    }
}

/// What an observed presence frame changed.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceChange {
    Discovered(PresenceDescriptor),
    Rediscovered(PresenceDescriptor),
    /// Known entry, same descriptor; only `last_seen` moved.
    Refreshed,
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    nodes: HashMap<NodeId, PresenceEntry>,
    assets: HashMap<NodeId, PresenceEntry>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert from a presence frame.
    ///
    /// An entry that switches between node and asset is moved and reported
    /// as discovered in its new table.
    pub fn observe(
        &mut self,
        node_id: NodeId,
        descriptor: PresenceDescriptor,
        now: Instant,
    ) -> PresenceChange {
        let (table, other) = if descriptor.asset {
            (&mut self.assets, &mut self.nodes)
        } else {
            (&mut self.nodes, &mut self.assets)
        };
        other.remove(&node_id);

        match table.get_mut(&node_id) {
            Some(entry) => {
                entry.last_seen = now;
                if entry.descriptor == descriptor {
                    PresenceChange::Refreshed
                } else {
                    entry.descriptor = descriptor.clone();
                    PresenceChange::Rediscovered(descriptor)
                }
            }
            None => {
                table.insert(
                    node_id,
                    PresenceEntry {
                        node_id,
                        descriptor: descriptor.clone(),
                        last_seen: now,
                    },
                );
                PresenceChange::Discovered(descriptor)
            }
        }
    }

    /// Refresh an entry's liveness from any frame it sent.
    pub fn touch(&mut self, node_id: &NodeId, now: Instant) {
        if let Some(entry) = self.nodes.get_mut(node_id).or_else(|| self.assets.get_mut(node_id)) {
            entry.last_seen = now;
        }
    }

    pub fn depart(&mut self, node_id: &NodeId) -> Option<PresenceEntry> {
        self.nodes
            .remove(node_id)
            .or_else(|| self.assets.remove(node_id))
    }

    /// Remove entries not seen within `ttl`.
    pub fn expire(&mut self, ttl: Duration, now: Instant) -> Vec<PresenceEntry> {
        let mut gone = Vec::new();
        for table in [&mut self.nodes, &mut self.assets] {
            let stale: Vec<NodeId> = table
                .iter()
                .filter(|(_, e)| now.duration_since(e.last_seen) >= ttl)
                .map(|(id, _)| *id)
                .collect();
            gone.extend(stale.iter().filter_map(|id| table.remove(id)));
        }
        gone
    }

    /// Remove everything, e.g. on leaving the group.
    pub fn clear(&mut self) -> Vec<PresenceEntry> {
        let mut gone: Vec<PresenceEntry> = self.nodes.drain().map(|(_, e)| e).collect();
        gone.extend(self.assets.drain().map(|(_, e)| e));
        gone
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    /// Members of the group: discovered nodes plus this engine.
    pub fn member_count(&self) -> usize {
        self.nodes.len() + 1
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PresenceEntry> {
        self.nodes.values()
    }

    pub fn assets(&self) -> impl Iterator<Item = &PresenceEntry> {
        self.assets.values()
    }
}
