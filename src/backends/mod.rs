//! HID backends for `ndof`.
//!
//! A backend is the raw transport: it lists device endpoints, opens them and
//! hands back report bytes. It knows nothing about events, connections or
//! matching; the dispatcher drives it from its own thread.
//!
//! # Feature flags
//! - **`hid`** (default): [`hid::HidApiBackend`], built on `hidapi`.
//!
//! [`virtual_input::VirtualBackend`] is always available. It is an in-process
//! backend whose devices are plugged, fed and unplugged by the application,
//! which makes it the backend of choice for tests and demos.

use std::time::Duration;

use crate::device::HidDeviceInfo;
use crate::error::NdofError;

#[cfg(feature = "hid")]
#[cfg_attr(docsrs, doc(cfg(feature = "hid")))]
pub mod hid;
pub mod virtual_input;

/// Raw report transport.
pub trait HidBackend: Send {
    /// Open device handle.
    type Handle: Send + 'static;

    /// List currently attached device endpoints.
    fn enumerate(&mut self) -> Result<Vec<HidDeviceInfo>, NdofError>;

    /// Open one endpoint for reading.
    fn open(&mut self, info: &HidDeviceInfo) -> Result<Self::Handle, NdofError>;

    /// Read one report into `buf`, waiting at most `timeout`.
    ///
    /// `Ok(0)` means no report was pending. [`NdofError::DeviceRemoved`]
    /// means the device is gone for good; other errors may be transient.
    fn read(
        &mut self,
        handle: &mut Self::Handle,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, NdofError>;

    /// Release a handle.
    fn close(&mut self, handle: Self::Handle);
}
