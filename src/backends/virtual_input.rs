//! In-process backend with scriptable devices.
//!
//! Plug a [`VirtualDevice`] into a [`VirtualBackend`], hand a clone of the
//! backend to [`Manager::begin_with`](crate::manager::Manager::begin_with),
//! then feed reports or unplug the device from any thread.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backends::HidBackend;
use crate::codec;
use crate::device::HidDeviceInfo;
use crate::error::NdofError;

#[derive(Debug)]
struct VirtualSlot {
    info: HidDeviceInfo,
    reports: VecDeque<Vec<u8>>,
    buttons: u32,
    open: bool,
    fail_open: bool,
    failing_reads: u32,
}

#[derive(Debug, Default)]
struct VirtualState {
    slots: Vec<VirtualSlot>,
    next_path: u64,
}

impl VirtualState {
    fn slot_mut(&mut self, path: &str) -> Option<&mut VirtualSlot> {
        self.slots.iter_mut().find(|s| s.info.path == path)
    }
}

/// Backend whose devices are plugged and fed by the application.
///
/// Clones share the same set of devices.
#[derive(Clone, Debug, Default)]
pub struct VirtualBackend {
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug in a device with a generated path.
    pub fn plug(&self, vendor_id: u16, product_id: u16, name: &str) -> VirtualDevice {
        let path = {
            let mut state = self.state.lock();
            let path = format!("virtual:{}", state.next_path);
            state.next_path += 1;
            path
        };
        self.plug_info(HidDeviceInfo::new(path, vendor_id, product_id, name))
    }

    /// Plug in a device described by `info`. An existing device with the
    /// same path is replaced.
    pub fn plug_info(&self, info: HidDeviceInfo) -> VirtualDevice {
        let path = info.path.clone();
        let mut state = self.state.lock();
        state.slots.retain(|s| s.info.path != path);
        state.slots.push(VirtualSlot {
            info,
            reports: VecDeque::new(),
            buttons: 0,
            open: false,
            fail_open: false,
            failing_reads: 0,
        });
        VirtualDevice {
            path,
            state: Arc::clone(&self.state),
        }
    }

    /// Number of plugged devices.
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Test-side handle to one virtual device.
#[derive(Clone, Debug)]
pub struct VirtualDevice {
    path: String,
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualDevice {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Queue a raw report (report id first). Ignored once unplugged.
    pub fn feed(&self, report: &[u8]) {
        if let Some(slot) = self.state.lock().slot_mut(&self.path) {
            slot.reports.push_back(report.to_vec());
        }
    }

    /// Queue a combined-layout motion report from raw axis counts.
    pub fn set_motion(&self, translation: [i16; 3], rotation: [i16; 3]) {
        self.feed(&codec::encode_motion(translation, rotation));
    }

    /// Press `button` (0..32) and queue the resulting button report.
    pub fn press_button(&self, button: u8) {
        let bit = 1u32.checked_shl(button.into()).unwrap_or(0);
        self.update_buttons(|mask| mask | bit);
    }

    pub fn release_button(&self, button: u8) {
        let bit = 1u32.checked_shl(button.into()).unwrap_or(0);
        self.update_buttons(|mask| mask & !bit);
    }

    fn update_buttons(&self, f: impl FnOnce(u32) -> u32) {
        if let Some(slot) = self.state.lock().slot_mut(&self.path) {
            slot.buttons = f(slot.buttons);
            let report = codec::encode_buttons(slot.buttons);
            slot.reports.push_back(report);
        }
    }

    /// Make the next `count` reads fail with a transient error.
    pub fn fail_reads(&self, count: u32) {
        if let Some(slot) = self.state.lock().slot_mut(&self.path) {
            slot.failing_reads = count;
        }
    }

    /// Make open attempts fail until reset.
    pub fn fail_open(&self, fail: bool) {
        if let Some(slot) = self.state.lock().slot_mut(&self.path) {
            slot.fail_open = fail;
        }
    }

    /// Whether the dispatcher currently holds this device open.
    pub fn is_open(&self) -> bool {
        self.state
            .lock()
            .slot_mut(&self.path)
            .is_some_and(|s| s.open)
    }

    /// Remove the device. Pending reports are discarded.
    pub fn unplug(&self) {
        self.state.lock().slots.retain(|s| s.info.path != self.path);
    }
}

/// Handle returned by [`VirtualBackend::open`].
#[derive(Debug)]
pub struct VirtualHandle {
    path: String,
}

impl HidBackend for VirtualBackend {
    type Handle = VirtualHandle;

    fn enumerate(&mut self) -> Result<Vec<HidDeviceInfo>, NdofError> {
        Ok(self
            .state
            .lock()
            .slots
            .iter()
            .map(|s| s.info.clone())
            .collect())
    }

    fn open(&mut self, info: &HidDeviceInfo) -> Result<VirtualHandle, NdofError> {
        let mut state = self.state.lock();
        let slot = state.slot_mut(&info.path).ok_or_else(|| NdofError::Open {
            path: info.path.clone(),
            reason: "not plugged in".into(),
        })?;
        if slot.fail_open {
            return Err(NdofError::Open {
                path: info.path.clone(),
                reason: "injected open failure".into(),
            });
        }
        slot.open = true;
        Ok(VirtualHandle {
            path: info.path.clone(),
        })
    }

    fn read(
        &mut self,
        handle: &mut VirtualHandle,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, NdofError> {
        let mut state = self.state.lock();
        let slot = state
            .slot_mut(&handle.path)
            .ok_or(NdofError::DeviceRemoved)?;
        if slot.failing_reads > 0 {
            slot.failing_reads -= 1;
            return Err(NdofError::Hid("injected read failure".into()));
        }
        match slot.reports.pop_front() {
            Some(report) => {
                let n = report.len().min(buf.len());
                buf[..n].copy_from_slice(&report[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    fn close(&mut self, handle: VirtualHandle) {
        if let Some(slot) = self.state.lock().slot_mut(&handle.path) {
            slot.open = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumerate_open_read() {
        let mut backend = VirtualBackend::new();
        let device = backend.plug(0x256f, 0xc635, "SpaceMouse Compact");
        device.set_motion([1, 2, 3], [4, 5, 6]);

        let infos = backend.enumerate().unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].path, device.path());

        let mut handle = backend.open(&infos[0]).unwrap();
        assert!(device.is_open());

        let mut buf = [0u8; 64];
        let n = backend.read(&mut handle, &mut buf, Duration::ZERO).unwrap();
        assert_eq!(&buf[..n], codec::encode_motion([1, 2, 3], [4, 5, 6]).as_slice());
        assert_eq!(backend.read(&mut handle, &mut buf, Duration::ZERO).unwrap(), 0);

        backend.close(handle);
        assert!(!device.is_open());
    }

    #[test]
    fn test_buttons_accumulate_mask() {
        let mut backend = VirtualBackend::new();
        let device = backend.plug(1, 1, "pad");
        device.press_button(0);
        device.press_button(3);
        device.release_button(0);

        let info = backend.enumerate().unwrap().remove(0);
        let mut handle = backend.open(&info).unwrap();
        let mut buf = [0u8; 64];
        let mut last = Vec::new();
        while let Ok(n) = backend.read(&mut handle, &mut buf, Duration::ZERO) {
            if n == 0 {
                break;
            }
            last = buf[..n].to_vec();
        }
        assert_eq!(last, codec::encode_buttons(0b1000));
    }

    #[test]
    fn test_injected_failures() {
        let mut backend = VirtualBackend::new();
        let device = backend.plug(1, 1, "pad");
        let info = backend.enumerate().unwrap().remove(0);

        device.fail_open(true);
        assert!(matches!(backend.open(&info), Err(NdofError::Open { .. })));
        device.fail_open(false);
        let mut handle = backend.open(&info).unwrap();

        device.fail_reads(1);
        let mut buf = [0u8; 8];
        assert!(matches!(
            backend.read(&mut handle, &mut buf, Duration::ZERO),
            Err(NdofError::Hid(_))
        ));
        assert_eq!(backend.read(&mut handle, &mut buf, Duration::ZERO).unwrap(), 0);

        device.unplug();
        assert!(backend.is_empty());
        assert!(matches!(
            backend.read(&mut handle, &mut buf, Duration::ZERO),
            Err(NdofError::DeviceRemoved)
        ));
    }
}
