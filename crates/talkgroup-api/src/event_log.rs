//! Bounded log of engine events for polling clients.
//!
//! Every event is stamped with a sequence number. Clients poll with the last
//! sequence they saw; entries older than the capacity are dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use talkgroup_core::Event;
use talkgroup_engine::{EventBus, SubscriptionHandle, TopicFilter};

#[derive(Debug, Clone, Serialize)]
pub struct LoggedEvent {
    pub seq: u64,
    #[serde(flatten)]
    pub event: Event,
}

#[derive(Debug, Default)]
struct LogInner {
    next_seq: u64,
    entries: VecDeque<LoggedEvent>,
}

#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    inner: Mutex<LogInner>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity: capacity.max(1),
            inner: Mutex::new(LogInner {
                next_seq: 1,
                entries: VecDeque::new(),
            }),
        })
    }

    /// Record every event posted on `bus`.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> SubscriptionHandle {
        let log = self.clone();
        bus.subscribe(TopicFilter::All, Arc::new(move |event: &Event| log.record(event)))
    }

    pub fn record(&self, event: &Event) {
        let mut inner = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.push_back(LoggedEvent {
            seq,
            event: event.clone(),
        });
        while inner.entries.len() > self.capacity {
            inner.entries.pop_front();
        }
    }

    /// Entries with a sequence number greater than `since`, and the sequence
    /// number the next event will get.
    pub fn since(&self, since: u64) -> (Vec<LoggedEvent>, u64) {
        let inner = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let events = inner
            .entries
            .iter()
            .filter(|e| e.seq > since)
            .cloned()
            .collect();
        (events, inner.next_seq)
    }
}
