//! Event streams from six-degree-of-freedom (3D mouse) input devices.
//!
//! A [`Manager`] runs one background dispatcher that owns every HID handle.
//! Applications ask for [`Connection`]s matching a [`ConnectionPolicy`] and
//! poll them for [`DeviceEvent`]s at their own pace; nothing is delivered
//! through callbacks.
//!
//! `Manager::begin` polls real hardware through `hidapi` (feature `hid`).
//! [`Manager::begin_with`] takes any [`backends::HidBackend`], such as the
//! in-process virtual one:
//!
//! ```no_run
//! use ndof::backends::virtual_input::VirtualBackend;
//! use ndof::{DeviceEvent, Manager};
//!
//! let backend = VirtualBackend::new();
//! let pad = backend.plug(0x256f, 0xc635, "SpaceMouse Compact");
//!
//! let mut ndof = Manager::new();
//! let mouse = ndof.connect_any();
//! ndof.begin_with(backend)?;
//! pad.set_motion([175, 0, 0], [0, 0, 0]);
//! if let DeviceEvent::Motion(m) = mouse.pop() {
//!     println!("{:?}", m.translation());
//! }
//! ndof.end()?;
//! # Ok::<(), ndof::NdofError>(())
//! ```

pub mod backends;
pub mod codec;
pub mod config;
pub mod connection;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod manager;
pub mod metadata;
pub mod queue;
pub mod registry;

pub use config::Config;
pub use connection::{Connection, ConnectionPolicy, DeviceMatch, Reconnect};
pub use device::{DeviceDescriptor, DeviceId, HidDeviceInfo};
pub use dispatcher::DispatcherStats;
pub use error::{DecodeError, NdofError};
pub use event::{ButtonChange, ButtonState, DeviceEvent, DeviceEventKind, Motion};
pub use manager::Manager;
