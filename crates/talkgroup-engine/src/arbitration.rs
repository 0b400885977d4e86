//! Transmit arbitration — who holds a group's floor.
//!
//! A half-duplex floor holds at most one claim. A request against a held
//! floor wins only with strictly higher priority; the displaced claim is
//! returned so the caller can notify its owner. A full-duplex floor grants
//! every request.
//!
//! Two nodes that claim at equal priority before hearing each other both
//! start out holding their own claim. A remote claim that ties with a local
//! one is settled by node id: the lower id keeps the floor, so both sides
//! reach the same answer.

use std::cmp::Ordering;
use std::time::Duration;

use tokio::time::Instant;

use talkgroup_core::group::TalkerInformation;
use talkgroup_core::wire::NodeId;

/// Identifies a transmit claim: one node may carry several aliases.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Talker {
    pub node_id: NodeId,
    pub alias: String,
}

impl Talker {
    pub fn new(node_id: NodeId, alias: impl Into<String>) -> Self {
        Self {
            node_id,
            alias: alias.into(),
        }
    }

    pub fn info(&self) -> TalkerInformation {
        TalkerInformation {
            alias: self.alias.clone(),
            node_id: hex::encode(self.node_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Claim {
    pub talker: Talker,
    pub priority: u8,
    /// Originated on this engine (as opposed to a remote floor claim).
    pub local: bool,
    pub started: Instant,
    /// Last claim frame sent (local) or received (remote).
    pub refreshed: Instant,
}

#[derive(Debug)]
pub enum ClaimOutcome {
    Granted { preempted: Vec<Claim> },
    /// The talker already holds a claim; it was refreshed.
    AlreadyHeld,
    Denied { holder: Talker },
}

#[derive(Debug, Default)]
pub struct Floor {
    full_duplex: bool,
    claims: Vec<Claim>,
}

impl Floor {
    pub fn new(full_duplex: bool) -> Self {
        Self {
            full_duplex,
            claims: Vec::new(),
        }
    }

    pub fn request(&mut self, talker: Talker, priority: u8, local: bool, now: Instant) -> ClaimOutcome {
        if let Some(existing) = self.claims.iter_mut().find(|c| c.talker == talker) {
            existing.refreshed = now;
            return ClaimOutcome::AlreadyHeld;
        }

        let mut preempted = Vec::new();
        if !self.full_duplex {
            if let Some(holder) = self.claims.first() {
                if !outranks(&talker, priority, local, holder) {
                    return ClaimOutcome::Denied {
                        holder: holder.talker.clone(),
                    };
                }
                preempted = std::mem::take(&mut self.claims);
            }
        }

        self.claims.push(Claim {
            talker,
            priority,
            local,
            started: now,
            refreshed: now,
        });
        ClaimOutcome::Granted { preempted }
    }

    pub fn release(&mut self, talker: &Talker) -> Option<Claim> {
        let idx = self.claims.iter().position(|c| &c.talker == talker)?;
        Some(self.claims.remove(idx))
    }

    /// Remove and return every claim matching `pred`.
    pub fn release_where(&mut self, pred: impl Fn(&Claim) -> bool) -> Vec<Claim> {
        let (gone, kept): (Vec<Claim>, Vec<Claim>) = std::mem::take(&mut self.claims)
            .into_iter()
            .partition(|c| pred(c));
        self.claims = kept;
        gone
    }

    pub fn release_local(&mut self) -> Vec<Claim> {
        self.release_where(|c| c.local)
    }

    pub fn release_remote(&mut self) -> Vec<Claim> {
        self.release_where(|c| !c.local)
    }

    /// Local claims held for `max` or longer.
    pub fn expire_local(&mut self, max: Duration, now: Instant) -> Vec<Claim> {
        self.release_where(|c| c.local && now.duration_since(c.started) >= max)
    }

    /// Remote claims not refreshed within `timeout`.
    pub fn expire_remote(&mut self, timeout: Duration, now: Instant) -> Vec<Claim> {
        self.release_where(|c| !c.local && now.duration_since(c.refreshed) >= timeout)
    }

    pub fn refresh(&mut self, talker: &Talker, now: Instant) {
        if let Some(c) = self.claims.iter_mut().find(|c| &c.talker == talker) {
            c.refreshed = now;
        }
    }

    /// Local claims whose last refresh is at least `every` old; marks them refreshed.
    pub fn due_for_refresh(&mut self, every: Duration, now: Instant) -> Vec<Claim> {
        let mut due = Vec::new();
        for c in self.claims.iter_mut().filter(|c| c.local) {
            if now.duration_since(c.refreshed) >= every {
                c.refreshed = now;
                due.push(c.clone());
            }
        }
        due
    }

    pub fn has_local(&self) -> bool {
        self.claims.iter().any(|c| c.local)
    }

    pub fn local_claims(&self) -> impl Iterator<Item = &Claim> {
        self.claims.iter().filter(|c| c.local)
    }

    /// The remote claim of a node, if it holds one. A node normally holds
    /// one claim; with several aliases the oldest wins.
    pub fn remote_claim_of(&self, node_id: &NodeId) -> Option<&Claim> {
        self.claims
            .iter()
            .find(|c| !c.local && &c.talker.node_id == node_id)
    }

    /// Remote talkers in claim order, as presented to receivers.
    pub fn remote_talkers(&self) -> Vec<TalkerInformation> {
        self.claims
            .iter()
            .filter(|c| !c.local)
            .map(|c| c.talker.info())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

/// Whether a new request displaces `holder` on a half-duplex floor.
fn outranks(talker: &Talker, priority: u8, local: bool, holder: &Claim) -> bool {
    match priority.cmp(&holder.priority) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => holder.local && !local && talker.node_id < holder.talker.node_id,
    }
}
