//! Device registry.
//!
//! Bookkeeping only, no I/O: which devices are known, which connections
//! exist (in creation order) and which connection is bound to which device.
//! The dispatcher is the only writer; the manager reads snapshots through
//! the same lock.
//!
//! Binding rules:
//! - a connection is bound to at most one device at a time;
//! - a device is claimed by at most one connection at a time, whatever the
//!   policy. A second connection stays unbound until another matching
//!   device shows up, so N connections can drive N devices.

use std::collections::BTreeMap;

use tracing::debug;

use crate::connection::{Connection, ConnectionPolicy, Reconnect};
use crate::device::{DeviceDescriptor, DeviceId, HidDeviceInfo};
use crate::error::NdofError;

#[derive(Debug)]
enum BindState {
    /// Never bound, or free to rebind to anything that matches.
    Pending,
    Bound(DeviceId),
    /// Unique connection waiting for the same device to come back.
    Released(DeviceDescriptor),
    /// `Reconnect::None` connection whose device went away.
    Retired,
}

#[derive(Debug)]
struct Slot {
    connection: Connection,
    state: BindState,
}

#[derive(Debug)]
struct DeviceEntry {
    descriptor: DeviceDescriptor,
    path: String,
    claimed_by: Option<u64>,
}

/// A device removed from the registry, with the connection that was bound
/// to it (already moved to its post-disconnect state).
#[derive(Debug)]
pub struct Unregistered {
    pub descriptor: DeviceDescriptor,
    pub path: String,
    pub connection: Option<Connection>,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<DeviceId, DeviceEntry>,
    slots: Vec<Slot>,
    next_device: u64,
    next_connection: u64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an opened device and assign it a fresh session id.
    pub fn register(&mut self, info: &HidDeviceInfo) -> DeviceDescriptor {
        let id = DeviceId(self.next_device);
        self.next_device += 1;
        let descriptor = DeviceDescriptor::from_info(id, info);
        self.devices.insert(
            id,
            DeviceEntry {
                descriptor: descriptor.clone(),
                path: info.path.clone(),
                claimed_by: None,
            },
        );
        descriptor
    }

    /// Forget a device. A bound connection moves to `Pending` (`Any`),
    /// `Released` (`Unique`) or `Retired` (`None`).
    pub fn unregister(&mut self, id: DeviceId) -> Option<Unregistered> {
        let entry = self.devices.remove(&id)?;
        let connection = entry.claimed_by.and_then(|cid| {
            let slot = self.slot_mut(cid)?;
            slot.state = match slot.connection.policy().reconnect {
                Reconnect::None => BindState::Retired,
                Reconnect::Unique => BindState::Released(entry.descriptor.clone()),
                Reconnect::Any => BindState::Pending,
            };
            Some(slot.connection.clone())
        });
        debug!(device = %id, released = connection.is_some(), "device unregistered");
        Some(Unregistered {
            descriptor: entry.descriptor,
            path: entry.path,
            connection,
        })
    }

    /// Unregister every device, in registration order.
    pub fn unregister_all(&mut self) -> Vec<Unregistered> {
        let ids: Vec<DeviceId> = self.devices.keys().copied().collect();
        ids.into_iter().filter_map(|id| self.unregister(id)).collect()
    }

    /// Create a new, unbound connection. Ids follow creation order.
    pub fn add_connection(&mut self, policy: ConnectionPolicy, capacity: usize) -> Connection {
        let connection = Connection::new(self.next_connection, policy, capacity);
        self.next_connection += 1;
        self.slots.push(Slot {
            connection: connection.clone(),
            state: BindState::Pending,
        });
        connection
    }

    /// Bind `connection` to `device`.
    ///
    /// Fails with `AlreadyBound` if the connection is bound elsewhere or the
    /// device is already claimed by another connection.
    pub fn bind(&mut self, connection: &Connection, device: &DeviceDescriptor) -> Result<(), NdofError> {
        let idx = self
            .slot_index(connection.id())
            .ok_or(NdofError::UnknownConnection(connection.id()))?;
        self.bind_slot(idx, device.id)
    }

    /// Release the connection's binding, leaving it free to bind again.
    pub fn unbind(&mut self, connection: &Connection) -> Option<DeviceId> {
        let idx = self.slot_index(connection.id())?;
        let BindState::Bound(id) = self.slots[idx].state else {
            return None;
        };
        self.slots[idx].state = BindState::Pending;
        if let Some(entry) = self.devices.get_mut(&id) {
            entry.claimed_by = None;
        }
        debug!(connection = connection.id(), device = %id, "unbound");
        Some(id)
    }

    /// Hand every unclaimed device to the oldest eligible connection.
    ///
    /// Devices are visited in registration order and, for each device,
    /// connections in creation order. Connections left over stay unbound.
    pub fn attach_pending(&mut self) -> Vec<(Connection, DeviceDescriptor)> {
        let mut attached = Vec::new();
        let free: Vec<DeviceId> = self
            .devices
            .iter()
            .filter(|(_, e)| e.claimed_by.is_none())
            .map(|(id, _)| *id)
            .collect();
        for id in free {
            let Some(idx) = (0..self.slots.len()).find(|&idx| self.eligible(idx, id)) else {
                continue;
            };
            if self.bind_slot(idx, id).is_ok() {
                attached.push((
                    self.slots[idx].connection.clone(),
                    self.devices[&id].descriptor.clone(),
                ));
            }
        }
        attached
    }

    /// The connection that owns `id`'s events, if any.
    pub fn bound_connection(&self, id: DeviceId) -> Option<Connection> {
        let cid = self.devices.get(&id)?.claimed_by?;
        self.slot_index(cid).map(|idx| self.slots[idx].connection.clone())
    }

    /// Device the connection is bound to, if any.
    pub fn binding(&self, connection: &Connection) -> Option<DeviceId> {
        let idx = self.slot_index(connection.id())?;
        match self.slots[idx].state {
            BindState::Bound(id) => Some(id),
            _ => None,
        }
    }

    /// Drop connections that only the registry still holds, freeing the
    /// devices they claimed. Returns how many were removed.
    pub fn prune_orphans(&mut self) -> usize {
        let orphans: Vec<(u64, Option<DeviceId>)> = self
            .slots
            .iter()
            .filter(|slot| slot.connection.handle_count() == 1)
            .map(|slot| {
                let bound = match slot.state {
                    BindState::Bound(id) => Some(id),
                    _ => None,
                };
                (slot.connection.id(), bound)
            })
            .collect();
        if orphans.is_empty() {
            return 0;
        }

        for (_, bound) in &orphans {
            if let Some(entry) = bound.and_then(|id| self.devices.get_mut(&id)) {
                entry.claimed_by = None;
            }
        }
        self.slots
            .retain(|slot| !orphans.iter().any(|(cid, _)| *cid == slot.connection.id()));
        debug!(count = orphans.len(), "pruned orphaned connections");
        orphans.len()
    }

    /// Snapshot of known devices in registration order.
    pub fn descriptors(&self) -> Vec<DeviceDescriptor> {
        self.devices.values().map(|e| e.descriptor.clone()).collect()
    }

    pub fn find_by_path(&self, path: &str) -> Option<DeviceId> {
        self.devices
            .iter()
            .find(|(_, e)| e.path == path)
            .map(|(id, _)| *id)
    }

    pub fn paths(&self) -> impl Iterator<Item = (DeviceId, &str)> {
        self.devices.iter().map(|(id, e)| (*id, e.path.as_str()))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn connection_count(&self) -> usize {
        self.slots.len()
    }

    fn slot_index(&self, cid: u64) -> Option<usize> {
        // slots stay sorted by id: created in order, pruning keeps order
        self.slots
            .binary_search_by_key(&cid, |s| s.connection.id())
            .ok()
    }

    fn slot_mut(&mut self, cid: u64) -> Option<&mut Slot> {
        let idx = self.slot_index(cid)?;
        self.slots.get_mut(idx)
    }

    fn eligible(&self, idx: usize, id: DeviceId) -> bool {
        let slot = &self.slots[idx];
        let Some(entry) = self.devices.get(&id) else {
            return false;
        };
        if !slot.connection.policy().matching.matches(&entry.descriptor) {
            return false;
        }
        match &slot.state {
            BindState::Pending => true,
            BindState::Released(previous) => previous.same_identity(&entry.descriptor),
            BindState::Bound(_) | BindState::Retired => false,
        }
    }

    fn bind_slot(&mut self, idx: usize, id: DeviceId) -> Result<(), NdofError> {
        let entry = self.devices.get_mut(&id).ok_or(NdofError::UnknownDevice(id))?;
        let slot = &mut self.slots[idx];
        if matches!(slot.state, BindState::Bound(_)) || entry.claimed_by.is_some() {
            return Err(NdofError::AlreadyBound);
        }

        let cid = slot.connection.id();
        slot.state = BindState::Bound(id);
        entry.claimed_by = Some(cid);
        debug!(connection = cid, device = %id, "bound");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(path: &str, vid: u16, pid: u16) -> HidDeviceInfo {
        HidDeviceInfo::new(path, vid, pid, "SpaceMouse Compact")
    }

    fn unique_any() -> ConnectionPolicy {
        ConnectionPolicy::any().reconnect(Reconnect::Unique)
    }

    #[test]
    fn test_register_assigns_sequential_ids() {
        let mut registry = DeviceRegistry::new();
        let a = registry.register(&info("a", 1, 1));
        let b = registry.register(&info("b", 1, 1));
        assert_eq!(a.id, DeviceId(0));
        assert_eq!(b.id, DeviceId(1));
        assert_eq!(registry.find_by_path("b"), Some(b.id));
        assert_eq!(registry.descriptors(), vec![a, b]);
    }

    #[test]
    fn test_device_claim_is_exclusive_for_every_policy() {
        for policy in [ConnectionPolicy::any(), unique_any()] {
            let mut registry = DeviceRegistry::new();
            let device = registry.register(&info("a", 1, 1));
            let first = registry.add_connection(policy.clone(), 8);
            let second = registry.add_connection(policy, 8);

            registry.bind(&first, &device).unwrap();
            assert!(matches!(
                registry.bind(&second, &device),
                Err(NdofError::AlreadyBound)
            ));
            assert!(registry.bound_connection(device.id).unwrap().same_as(&first));
        }
    }

    #[test]
    fn test_bound_connection_cannot_bind_twice() {
        let mut registry = DeviceRegistry::new();
        let a = registry.register(&info("a", 1, 1));
        let b = registry.register(&info("b", 1, 1));
        let conn = registry.add_connection(ConnectionPolicy::any(), 8);

        registry.bind(&conn, &a).unwrap();
        assert!(matches!(registry.bind(&conn, &b), Err(NdofError::AlreadyBound)));
        assert_eq!(registry.unbind(&conn), Some(a.id));
        registry.bind(&conn, &b).unwrap();
        assert_eq!(registry.binding(&conn), Some(b.id));
        assert!(registry.bound_connection(a.id).is_none());
    }

    #[test]
    fn test_default_connections_spread_over_devices() {
        let mut registry = DeviceRegistry::new();
        let a = registry.register(&info("a", 1, 1));
        let b = registry.register(&info("b", 1, 1));
        let x = registry.add_connection(ConnectionPolicy::any(), 8);
        let y = registry.add_connection(ConnectionPolicy::any(), 8);
        let z = registry.add_connection(ConnectionPolicy::any(), 8);

        let attached = registry.attach_pending();
        assert_eq!(attached.len(), 2);
        assert_eq!(registry.binding(&x), Some(a.id));
        assert_eq!(registry.binding(&y), Some(b.id));
        assert_eq!(registry.binding(&z), None);
    }

    #[test]
    fn test_tie_break_follows_creation_order() {
        let mut registry = DeviceRegistry::new();
        let first = registry.add_connection(unique_any(), 8);
        let second = registry.add_connection(ConnectionPolicy::any(), 8);
        let device = registry.register(&info("a", 1, 1));

        let attached = registry.attach_pending();
        assert_eq!(attached.len(), 1);
        assert!(attached[0].0.same_as(&first));
        assert_eq!(attached[0].1, device);
        assert_eq!(registry.binding(&second), None);

        // a second device picks up the leftover
        let other = registry.register(&info("b", 1, 1));
        let attached = registry.attach_pending();
        assert_eq!(attached.len(), 1);
        assert!(attached[0].0.same_as(&second));
        assert_eq!(attached[0].1.id, other.id);
    }

    #[test]
    fn test_policy_filters_devices() {
        let mut registry = DeviceRegistry::new();
        registry.register(&info("a", 0x046d, 0xc626));
        let wanted = registry.register(&info("b", 0x256f, 0xc635));
        let conn = registry.add_connection(ConnectionPolicy::vid_pid(0x256f, 0xc635), 8);

        registry.attach_pending();
        assert_eq!(registry.binding(&conn), Some(wanted.id));
    }

    #[test]
    fn test_skips_claimed_device_for_next_match() {
        let mut registry = DeviceRegistry::new();
        let a = registry.register(&info("a", 1, 1));
        let b = registry.register(&info("b", 2, 2));
        let picky = registry.add_connection(ConnectionPolicy::vid_pid(2, 2), 8);
        let easy = registry.add_connection(ConnectionPolicy::any(), 8);

        registry.attach_pending();
        assert_eq!(registry.binding(&picky), Some(b.id));
        assert_eq!(registry.binding(&easy), Some(a.id));
    }

    #[test]
    fn test_reconnect_modes_after_unregister() {
        let mut registry = DeviceRegistry::new();
        let none = registry.add_connection(ConnectionPolicy::any().reconnect(Reconnect::None), 8);
        let any = registry.add_connection(ConnectionPolicy::any().reconnect(Reconnect::Any), 8);
        let unique = registry.add_connection(unique_any(), 8);
        let devices: Vec<DeviceDescriptor> = ["a", "b", "c"]
            .into_iter()
            .map(|path| registry.register(&info(path, 1, 1)))
            .collect();
        assert_eq!(registry.attach_pending().len(), 3);

        for device in &devices {
            let gone = registry.unregister(device.id).unwrap();
            assert!(gone.connection.is_some());
        }
        assert!(registry.is_empty());

        // a different model: only `Any` follows
        registry.register(&info("d", 2, 2));
        let attached = registry.attach_pending();
        assert_eq!(attached.len(), 1);
        assert!(attached[0].0.same_as(&any));

        // the same model again: `Unique` rebinds, `None` stays retired
        let again = registry.register(&info("e", 1, 1));
        let attached = registry.attach_pending();
        assert_eq!(attached.len(), 1);
        assert!(attached[0].0.same_as(&unique));
        assert_eq!(registry.binding(&unique), Some(again.id));
        assert_eq!(registry.binding(&none), None);
    }

    #[test]
    fn test_unregister_unclaimed_device() {
        let mut registry = DeviceRegistry::new();
        let device = registry.register(&info("a", 1, 1));
        let gone = registry.unregister(device.id).unwrap();
        assert_eq!(gone.path, "a");
        assert!(gone.connection.is_none());
        assert!(registry.unregister(device.id).is_none());
    }

    #[test]
    fn test_claim_released_on_unbind() {
        let mut registry = DeviceRegistry::new();
        let device = registry.register(&info("a", 1, 1));
        let first = registry.add_connection(unique_any(), 8);
        let second = registry.add_connection(ConnectionPolicy::any(), 8);
        registry.attach_pending();
        assert_eq!(registry.binding(&second), None);

        registry.unbind(&first);
        registry.bind(&second, &device).unwrap();
        assert_eq!(registry.binding(&second), Some(device.id));
    }

    #[test]
    fn test_prune_orphans_frees_device() {
        let mut registry = DeviceRegistry::new();
        let device = registry.register(&info("a", 1, 1));
        let dropped = registry.add_connection(ConnectionPolicy::any(), 8);
        let waiting = registry.add_connection(ConnectionPolicy::any(), 8);
        registry.attach_pending();
        assert_eq!(registry.binding(&waiting), None);
        drop(dropped);

        assert_eq!(registry.prune_orphans(), 1);
        assert_eq!(registry.connection_count(), 1);
        assert!(registry.bound_connection(device.id).is_none());

        registry.attach_pending();
        assert!(registry.bound_connection(device.id).unwrap().same_as(&waiting));
    }

    #[test]
    fn test_unknown_ids() {
        let mut registry = DeviceRegistry::new();
        let device = registry.register(&info("a", 1, 1));
        let stranger = Connection::new(99, ConnectionPolicy::any(), 1);
        assert!(matches!(
            registry.bind(&stranger, &device),
            Err(NdofError::UnknownConnection(99))
        ));

        let conn = registry.add_connection(ConnectionPolicy::any(), 1);
        registry.unregister(device.id);
        assert!(matches!(
            registry.bind(&conn, &device),
            Err(NdofError::UnknownDevice(_))
        ));
    }
}
