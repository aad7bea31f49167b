//! Per-connection event queue.
//!
//! One writer (the dispatcher thread) and any number of readers (clones of
//! a [`Connection`](crate::connection::Connection)). Each queue has its own
//! lock, held only for the duration of a push or a pop, so a slow consumer
//! on one connection never stalls delivery to another.
//!
//! The queue is bounded. When full, the oldest event is evicted and the
//! dropped counter goes up.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::event::DeviceEvent;

/// Default per-connection capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct ConnectionQueue {
    events: Mutex<VecDeque<DeviceEvent>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl Default for ConnectionQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl ConnectionQueue {
    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_QUEUE_CAPACITY))),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Append an event. Returns `true` if the oldest event had to be evicted.
    pub(crate) fn push(&self, event: DeviceEvent) -> bool {
        let mut events = self.events.lock();
        let evicted = if events.len() >= self.capacity {
            events.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        };
        events.push_back(event);
        evicted
    }

    /// Remove the front event, or return [`DeviceEvent::Empty`]. Never blocks
    /// on anything but the queue's own short-lived lock.
    pub fn pop(&self) -> DeviceEvent {
        self.events.lock().pop_front().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of events evicted because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
