//! Event bus — routes engine events to subscribers.
//!
//! Subscribers live in a copy-on-write snapshot. Dispatch clones the current
//! `Arc<Vec<..>>` and iterates it without holding the lock, so a handler may
//! subscribe or unsubscribe without deadlocking. Posting never blocks: events
//! go onto an unbounded queue drained by a single dispatcher task, so every
//! subscriber sees events in posting order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use talkgroup_core::{Event, Topic};

/// Callback invoked for every matching event.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Which events a subscriber receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicFilter {
    All,
    Only(Topic),
}

impl TopicFilter {
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            TopicFilter::All => true,
            TopicFilter::Only(topic) => event.topic() == *topic,
        }
    }
}

/// Returned by [`EventBus::subscribe`]; pass to [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

#[derive(Clone)]
struct Subscriber {
    id: u64,
    filter: TopicFilter,
    handler: Handler,
}

type Registry = Arc<RwLock<Arc<Vec<Subscriber>>>>;

pub struct EventBus {
    subscribers: Registry,
    next_id: AtomicU64,
    tx: mpsc::UnboundedSender<Event>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            subscribers: Arc::new(RwLock::new(Arc::new(Vec::new()))),
            next_id: AtomicU64::new(1),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    pub fn subscribe(&self, filter: TopicFilter, handler: Handler) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut guard = match self.subscribers.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next: Vec<Subscriber> = guard.as_ref().clone();
        next.push(Subscriber { id, filter, handler });
        *guard = Arc::new(next);
        SubscriptionHandle(id)
    }

    /// Subscribe with a channel instead of a callback.
    pub fn subscribe_channel(
        &self,
        filter: TopicFilter,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.subscribe(
            filter,
            Arc::new(move |event: &Event| {
                let _ = tx.send(event.clone());
            }),
        );
        (handle, rx)
    }

    /// Returns false if the handle was not registered.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut guard = match self.subscribers.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !guard.iter().any(|s| s.id == handle.0) {
            return false;
        }
        let next: Vec<Subscriber> = guard
            .iter()
            .filter(|s| s.id != handle.0)
            .cloned()
            .collect();
        *guard = Arc::new(next);
        true
    }

    pub fn subscriber_count(&self) -> usize {
        snapshot(&self.subscribers).len()
    }

    /// Queue an event for dispatch.
    pub fn post(&self, event: Event) {
        tracing::trace!(event = %event.name(), "posting event");
        let _ = self.tx.send(event);
    }

    /// Start the dispatcher task. Only the first call spawns; later calls
    /// return None.
    pub fn spawn_dispatcher(&self) -> Option<JoinHandle<()>> {
        let mut rx = match self.rx.lock() {
            Ok(mut g) => g.take()?,
            Err(poisoned) => poisoned.into_inner().take()?,
        };
        let subscribers = self.subscribers.clone();
        Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                dispatch(&subscribers, &event);
            }
            tracing::debug!("event dispatcher stopped");
        }))
    }
}

fn snapshot(registry: &Registry) -> Arc<Vec<Subscriber>> {
    match registry.read() {
        Ok(g) => g.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn dispatch(registry: &Registry, event: &Event) {
    let subscribers = snapshot(registry);
    for sub in subscribers.iter().filter(|s| s.filter.matches(event)) {
        (sub.handler)(event);
    }
}
