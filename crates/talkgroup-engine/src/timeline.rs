//! In-memory timeline store — one per group.
//!
//! Records transmit (outbound) and receive (inbound) talk spurts. Times are
//! unix milliseconds; callers pass `now_ms` so grooming and update throttling
//! are deterministic under test.

use std::collections::{HashMap, VecDeque};

use talkgroup_core::config::TimelinePolicy;
use talkgroup_core::group::{Direction, TimelineEvent, TimelineQuery, TimelineReport};

/// Minimum spacing of update notifications for one event.
pub const UPDATE_INTERVAL_MS: u64 = 1000;

/// Identifies an open event: one per talker and direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpurtKey {
    pub direction: Direction,
    pub node_id: String,
    pub alias: String,
}

#[derive(Debug)]
struct OpenSpurt {
    id: u64,
    last_update_ms: u64,
}

#[derive(Debug)]
pub struct Timeline {
    events: VecDeque<TimelineEvent>,
    open: HashMap<SpurtKey, OpenSpurt>,
    next_id: u64,
    max_attachment_bytes: u64,
    max_events: usize,
}

impl Timeline {
    pub fn new(max_attachment_bytes: u64, max_events: usize) -> Self {
        Self {
            events: VecDeque::new(),
            open: HashMap::new(),
            next_id: 1,
            max_attachment_bytes,
            max_events,
        }
    }

    /// Open an event for `key`. An already-open event for the same key is
    /// returned unchanged.
    pub fn begin(&mut self, key: SpurtKey, now_ms: u64) -> TimelineEvent {
        if let Some(open) = self.open.get(&key) {
            if let Some(ev) = self.find(open.id) {
                return ev.clone();
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        let event = TimelineEvent {
            id,
            direction: key.direction,
            node_id: key.node_id.clone(),
            alias: key.alias.clone(),
            started: now_ms,
            ended: None,
            attachment_bytes: 0,
            truncated: false,
        };
        self.events.push_back(event.clone());
        self.open.insert(
            key,
            OpenSpurt {
                id,
                last_update_ms: now_ms,
            },
        );
        self.enforce_count();
        event
    }

    /// Account media bytes to an open event. Returns the event when an update
    /// notification is due.
    pub fn record(&mut self, key: &SpurtKey, bytes: usize, now_ms: u64) -> Option<TimelineEvent> {
        let open = self.open.get_mut(key)?;
        let id = open.id;
        let due = now_ms.saturating_sub(open.last_update_ms) >= UPDATE_INTERVAL_MS;
        if due {
            open.last_update_ms = now_ms;
        }

        let cap = self.max_attachment_bytes;
        let event = self.events.iter_mut().find(|e| e.id == id)?;
        let total = event.attachment_bytes + bytes as u64;
        if total > cap {
            event.attachment_bytes = cap;
            event.truncated = true;
        } else {
            event.attachment_bytes = total;
        }

        due.then(|| event.clone())
    }

    pub fn end(&mut self, key: &SpurtKey, now_ms: u64) -> Option<TimelineEvent> {
        let open = self.open.remove(key)?;
        let event = self.events.iter_mut().find(|e| e.id == open.id)?;
        event.ended = Some(now_ms.max(event.started));
        Some(event.clone())
    }

    /// Close every open event, e.g. when the group is left.
    pub fn end_all(&mut self, now_ms: u64) -> Vec<TimelineEvent> {
        let keys: Vec<SpurtKey> = self.open.keys().cloned().collect();
        keys.iter().filter_map(|k| self.end(k, now_ms)).collect()
    }

    /// Apply the age and count quotas. In-progress events are kept.
    /// Returns the number of events removed.
    pub fn groom(&mut self, policy: &TimelinePolicy, now_ms: u64) -> usize {
        let before = self.events.len();
        let max_age_ms = policy.max_event_age_secs.saturating_mul(1000);
        self.events.retain(|e| {
            e.in_progress() || now_ms.saturating_sub(e.started) < max_age_ms
        });
        self.max_events = policy.max_events;
        self.enforce_count();
        before - self.events.len()
    }

    pub fn query(&self, group_id: &str, q: &TimelineQuery) -> TimelineReport {
        let matches = |e: &&TimelineEvent| {
            if q.started_on_or_after != 0 && e.started < q.started_on_or_after {
                return false;
            }
            if q.ended_on_or_before != 0 {
                match e.ended {
                    Some(ended) if ended <= q.ended_on_or_before => {}
                    _ => return false,
                }
            }
            if q.only_direction.is_some_and(|d| d != e.direction) {
                return false;
            }
            if q.only_alias.as_ref().is_some_and(|a| a != &e.alias) {
                return false;
            }
            if q.only_node_id.as_ref().is_some_and(|n| n != &e.node_id) {
                return false;
            }
            true
        };

        let mut found: Vec<TimelineEvent> = self.events.iter().filter(matches).cloned().collect();
        let total_matched = found.len();
        if q.most_recent_first {
            found.reverse();
        }
        found.truncate(q.max_count);

        TimelineReport {
            group_id: group_id.to_string(),
            total_matched,
            events: found,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn find(&self, id: u64) -> Option<&TimelineEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    /// Drop the oldest completed events beyond `max_events`.
    fn enforce_count(&mut self) {
        while self.events.len() > self.max_events {
            match self.events.iter().position(|e| !e.in_progress()) {
                Some(idx) => {
                    self.events.remove(idx);
                }
                None => break,
            }
        }
    }
}
