//! Logical connections.
//!
//! A [`Connection`] expresses interest in "a device matching this policy".
//! It is created unbound; the dispatcher binds it on a later tick and from
//! then on feeds its queue.
//!
//! # Copies are aliases
//! Cloning a `Connection` does not create a second subscriber. All clones
//! share one queue, so every event is popped exactly once across all of
//! them. This lets a connection live as a field of a type that is itself
//! cloned without events being duplicated.
//!
//! When the last clone is dropped the dispatcher notices on its next tick
//! and releases the binding.

use std::fmt;
use std::sync::Arc;

use crate::device::DeviceDescriptor;
use crate::event::DeviceEvent;
use crate::queue::ConnectionQueue;

/// Which devices a connection is willing to bind to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceMatch {
    Any,
    VidPid { vendor_id: u16, product_id: u16 },
    /// Case-insensitive substring of the product name.
    Name(String),
}

impl DeviceMatch {
    pub fn matches(&self, device: &DeviceDescriptor) -> bool {
        match self {
            DeviceMatch::Any => true,
            DeviceMatch::VidPid {
                vendor_id,
                product_id,
            } => device.vendor_id == *vendor_id && device.product_id == *product_id,
            DeviceMatch::Name(name) => device
                .name
                .to_lowercase()
                .contains(&name.to_lowercase()),
        }
    }
}

/// What a connection does after its device disconnects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Reconnect {
    /// Stay unbound for good.
    None,
    /// Only rebind to a device that looks like the same one (VID/PID plus
    /// serial, or name when no serial).
    Unique,
    /// Rebind to any device satisfying the original match.
    #[default]
    Any,
}

/// Matching policy plus reconnection mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionPolicy {
    pub matching: DeviceMatch,
    pub reconnect: Reconnect,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self::any()
    }
}

impl ConnectionPolicy {
    pub fn any() -> Self {
        Self {
            matching: DeviceMatch::Any,
            reconnect: Reconnect::default(),
        }
    }

    pub fn vid_pid(vendor_id: u16, product_id: u16) -> Self {
        Self {
            matching: DeviceMatch::VidPid {
                vendor_id,
                product_id,
            },
            reconnect: Reconnect::default(),
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self {
            matching: DeviceMatch::Name(name.into()),
            reconnect: Reconnect::default(),
        }
    }

    pub fn reconnect(mut self, reconnect: Reconnect) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn is_unique(&self) -> bool {
        self.reconnect == Reconnect::Unique
    }
}

struct ConnectionInner {
    id: u64,
    policy: ConnectionPolicy,
    queue: ConnectionQueue,
}

/// Shared handle to one logical connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn new(id: u64, policy: ConnectionPolicy, capacity: usize) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                policy,
                queue: ConnectionQueue::with_capacity(capacity),
            }),
        }
    }

    /// Pull the next event. Returns [`DeviceEvent::Empty`] when nothing is
    /// pending; never waits for the device.
    pub fn pop(&self) -> DeviceEvent {
        self.inner.queue.pop()
    }

    /// Creation-order id, unique within a manager.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn policy(&self) -> &ConnectionPolicy {
        &self.inner.policy
    }

    /// Events currently waiting.
    pub fn len(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queue.is_empty()
    }

    /// Events lost to queue overflow since the connection was created.
    pub fn dropped(&self) -> u64 {
        self.inner.queue.dropped()
    }

    pub(crate) fn push(&self, event: DeviceEvent) -> bool {
        self.inner.queue.push(event)
    }

    /// Number of live handles, including the registry's own.
    pub(crate) fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    #[cfg(test)]
    pub(crate) fn same_as(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("policy", &self.inner.policy)
            .field("pending", &self.inner.queue.len())
            .field("dropped", &self.inner.queue.dropped())
            .finish()
    }
}
