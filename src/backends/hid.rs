//! `hidapi` backend.
//!
//! Enumerates catalogue devices plus any interface advertising the
//! multi-axis controller usage (page `0x01`, usage `0x08`). Reads use
//! `read_timeout`, so a quiet device costs at most the configured timeout
//! per tick.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::time::Duration;

use hidapi::{DeviceInfo, HidApi, HidDevice};
use tracing::debug;

use crate::backends::HidBackend;
use crate::device::HidDeviceInfo;
use crate::error::NdofError;
use crate::metadata::Catalog;

const USAGE_PAGE_GENERIC_DESKTOP: u16 = 0x01;
const USAGE_MULTI_AXIS_CONTROLLER: u16 = 0x08;

pub struct HidApiBackend {
    api: HidApi,
    catalog: Catalog,
    paths: PathTable,
}

/// Maps the string paths handed to the dispatcher back to the exact bytes
/// `hidapi` reported, so non-UTF-8 paths still open.
#[derive(Debug, Default)]
struct PathTable {
    raw: HashMap<String, CString>,
}

impl PathTable {
    fn insert(&mut self, raw: &CStr) -> String {
        let key = match raw.to_str() {
            Ok(s) => s.to_owned(),
            Err(_) => raw.to_bytes().escape_ascii().to_string(),
        };
        self.raw.insert(key.clone(), raw.to_owned());
        key
    }

    fn resolve(&self, path: &str) -> Result<CString, String> {
        match self.raw.get(path) {
            Some(raw) => Ok(raw.clone()),
            None => CString::new(path).map_err(|e| e.to_string()),
        }
    }

    fn retain(&mut self, live: &[HidDeviceInfo]) {
        self.raw.retain(|key, _| live.iter().any(|i| i.path == *key));
    }
}

/// Open `hidapi` device.
pub struct HidHandle {
    path: String,
    device: HidDevice,
}

impl HidApiBackend {
    pub fn new(catalog: Catalog) -> Result<Self, NdofError> {
        let api = HidApi::new().map_err(|e| NdofError::Backend(e.to_string()))?;
        Ok(Self {
            api,
            catalog,
            paths: PathTable::default(),
        })
    }

    fn accept(&self, info: &DeviceInfo) -> bool {
        if self.catalog.contains(info.vendor_id(), info.product_id()) {
            // Catalogue devices expose several interfaces; the motion reports
            // come from the Generic Desktop one.
            return info.usage_page() == USAGE_PAGE_GENERIC_DESKTOP || info.usage_page() == 0;
        }
        info.usage_page() == USAGE_PAGE_GENERIC_DESKTOP && info.usage() == USAGE_MULTI_AXIS_CONTROLLER
    }
}

impl HidBackend for HidApiBackend {
    type Handle = HidHandle;

    fn enumerate(&mut self) -> Result<Vec<HidDeviceInfo>, NdofError> {
        self.api.refresh_devices()?;

        let mut found: Vec<HidDeviceInfo> = Vec::new();
        for info in self.api.device_list() {
            if !self.accept(info) {
                continue;
            }
            let path = self.paths.insert(info.path());
            // one entry per path; some platforms list a path per usage
            if found.iter().any(|f| f.path == path) {
                continue;
            }
            let name = info
                .product_string()
                .map(str::to_string)
                .or_else(|| {
                    self.catalog
                        .lookup(info.vendor_id(), info.product_id())
                        .map(|m| m.name)
                })
                .unwrap_or_else(|| "Unknown".to_string());
            found.push(HidDeviceInfo {
                path,
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
                name,
                serial: info
                    .serial_number()
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            });
        }
        self.paths.retain(&found);
        Ok(found)
    }

    fn open(&mut self, info: &HidDeviceInfo) -> Result<HidHandle, NdofError> {
        let open_error = |reason: String| NdofError::Open {
            path: info.path.clone(),
            reason,
        };
        let c_path = self.paths.resolve(&info.path).map_err(&open_error)?;
        let device = self
            .api
            .open_path(&c_path)
            .map_err(|e| open_error(e.to_string()))?;
        debug!(
            "opened {:04x}:{:04x} {} at {}",
            info.vendor_id, info.product_id, info.name, info.path
        );
        Ok(HidHandle {
            path: info.path.clone(),
            device,
        })
    }

    fn read(
        &mut self,
        handle: &mut HidHandle,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, NdofError> {
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        handle.device.read_timeout(buf, timeout_ms).map_err(|e| {
            let msg = e.to_string();
            // hidraw reports ENODEV once the device is unplugged
            if msg.contains("No such device") || msg.contains("ENODEV") {
                NdofError::DeviceRemoved
            } else {
                NdofError::Hid(msg)
            }
        })
    }

    fn close(&mut self, handle: HidHandle) {
        debug!("closing {}", handle.path);
        drop(handle.device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_path_round_trips() {
        let mut paths = PathTable::default();
        let raw = CString::new("/dev/hidraw3").unwrap();
        let key = paths.insert(&raw);
        assert_eq!(key, "/dev/hidraw3");
        assert_eq!(paths.resolve(&key).unwrap(), raw);
    }

    #[test]
    fn test_non_utf8_path_keeps_raw_bytes() {
        let mut paths = PathTable::default();
        let raw = CString::new(b"/dev/hid\xffraw".to_vec()).unwrap();
        let other = CString::new(b"/dev/hid\xferaw".to_vec()).unwrap();
        let key = paths.insert(&raw);
        let other_key = paths.insert(&other);
        assert_ne!(key, other_key);
        assert_eq!(paths.resolve(&key).unwrap(), raw);
        assert_eq!(paths.resolve(&other_key).unwrap(), other);
    }

    #[test]
    fn test_unknown_path_falls_back_and_rejects_nul() {
        let paths = PathTable::default();
        assert_eq!(
            paths.resolve("/dev/hidraw9").unwrap(),
            CString::new("/dev/hidraw9").unwrap()
        );
        assert!(paths.resolve("bad\0path").is_err());
    }

    #[test]
    fn test_retain_drops_vanished_paths() {
        let mut paths = PathTable::default();
        let gone = paths.insert(&CString::new("/dev/hidraw1").unwrap());
        let kept = paths.insert(&CString::new("/dev/hidraw2").unwrap());
        paths.retain(&[HidDeviceInfo::new(kept.clone(), 1, 1, "pad")]);
        assert!(paths.raw.contains_key(&kept));
        assert!(!paths.raw.contains_key(&gone));
    }
}
