//! Concurrency-safe set of per-connection event channels.
//!
//! Each live observer (an SSE connection, typically) owns a bounded channel
//! registered here. Broadcast is best-effort: a full channel drops that
//! subscriber's copy of the event rather than stalling the capture path.

use dashmap::DashMap;
use hooktrap_types::WebhookEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Channel capacity per subscriber. Absorbs bursts; anything beyond is dropped.
const SUBSCRIBER_BUFFER: usize = 100;

/// Registry of live event subscribers.
pub struct SubscriberRegistry {
    subscribers: DashMap<Uuid, mpsc::Sender<WebhookEvent>>,
    dropped: AtomicU64,
    capacity: usize,
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::with_capacity(SUBSCRIBER_BUFFER)
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            dropped: AtomicU64::new(0),
            capacity,
        }
    }

    /// Register a new subscriber and hand back its receiving end.
    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<WebhookEvent>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.insert(id, tx);
        debug!(target: "hooktrap::events", "Subscriber {} registered ({} total)", id, self.subscribers.len());
        (id, rx)
    }

    /// Remove a subscriber. Dropping its sender signals end-of-stream to the
    /// receiver. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: Uuid) {
        if self.subscribers.remove(&id).is_some() {
            debug!(target: "hooktrap::events", "Subscriber {} removed ({} remain)", id, self.subscribers.len());
        }
    }

    /// Send the event to every subscriber whose channel has room.
    ///
    /// Never blocks: a full or closed channel silently misses this event.
    /// Returns the number of subscribers that received it.
    pub fn broadcast(&self, event: &WebhookEvent) -> usize {
        let mut delivered = 0;
        for entry in self.subscribers.iter() {
            match entry.value().try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        delivered
    }

    /// Close every channel and clear the registry. Receivers observe EOF.
    pub fn close_all(&self) {
        let count = self.subscribers.len();
        self.subscribers.clear();
        if count > 0 {
            debug!(target: "hooktrap::events", "Closed {} subscriber channels", count);
        }
    }

    /// Number of live subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Total events dropped due to full or closed channels.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
