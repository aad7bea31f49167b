//! Device identity.
//!
//! A backend reports what it can see as [`HidDeviceInfo`] records. Once the
//! dispatcher has opened one, the registry assigns it a session-local
//! [`DeviceId`] and publishes a [`DeviceDescriptor`].
//!
//! Ids are never reused within a process and mean nothing across restarts.
//! A device that is unplugged and plugged back in gets a fresh id.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Session-local device identifier, assigned in registration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ndof:{}", self.0)
    }
}

/// One enumerable device endpoint as reported by a backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HidDeviceInfo {
    /// Backend-specific, opaque path. Stable while the device stays plugged in.
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Product string, or a placeholder when the device has none.
    pub name: String,
    /// Serial number string when the firmware exposes one.
    pub serial: Option<String>,
}

impl HidDeviceInfo {
    pub fn new(path: impl Into<String>, vendor_id: u16, product_id: u16, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            vendor_id,
            product_id,
            name: name.into(),
            serial: None,
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }
}

/// A connected, opened NDOF device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: String,
    pub serial: Option<String>,
}

impl DeviceDescriptor {
    pub(crate) fn from_info(id: DeviceId, info: &HidDeviceInfo) -> Self {
        Self {
            id,
            vendor_id: info.vendor_id,
            product_id: info.product_id,
            name: info.name.clone(),
            serial: info.serial.clone(),
        }
    }

    /// Best-effort "is this the same physical device" check.
    ///
    /// VID/PID must agree. If both sides carry a serial number it decides;
    /// otherwise the product name has to match.
    pub fn same_identity(&self, other: &DeviceDescriptor) -> bool {
        if self.vendor_id != other.vendor_id || self.product_id != other.product_id {
            return false;
        }
        match (&self.serial, &other.serial) {
            (Some(a), Some(b)) => a == b,
            _ => self.name == other.name,
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:04x}:{:04x}] {}",
            self.id, self.vendor_id, self.product_id, self.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: u64, serial: Option<&str>) -> DeviceDescriptor {
        let mut info = HidDeviceInfo::new(format!("p{id}"), 0x256f, 0xc635, "SpaceMouse Compact");
        info.serial = serial.map(str::to_string);
        DeviceDescriptor::from_info(DeviceId(id), &info)
    }

    #[test]
    fn test_identity_uses_serial_when_both_present() {
        assert!(descriptor(1, Some("A1")).same_identity(&descriptor(2, Some("A1"))));
        assert!(!descriptor(1, Some("A1")).same_identity(&descriptor(2, Some("B2"))));
    }

    #[test]
    fn test_identity_falls_back_to_name() {
        assert!(descriptor(1, None).same_identity(&descriptor(2, Some("A1"))));

        let mut other = descriptor(2, None);
        other.name = "SpaceMouse Pro".into();
        assert!(!descriptor(1, None).same_identity(&other));
    }

    #[test]
    fn test_identity_requires_vid_pid() {
        let mut other = descriptor(2, None);
        other.product_id = 0xc626;
        assert!(!descriptor(1, None).same_identity(&other));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            descriptor(7, None).to_string(),
            "ndof:7 [256f:c635] SpaceMouse Compact"
        );
    }

    #[test]
    fn test_descriptor_serializes_flat() {
        let json = serde_json::to_value(descriptor(3, Some("A1"))).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": 3,
                "vendor_id": 0x256f,
                "product_id": 0xc635,
                "name": "SpaceMouse Compact",
                "serial": "A1",
            })
        );
    }
}
