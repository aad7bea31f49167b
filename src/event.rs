//! Device events.
//!
//! Everything a [`Connection`](crate::connection::Connection) yields is a
//! [`DeviceEvent`]. The variant tells you what happened; the payload is only
//! reachable through the matching accessor (or a `match`).
//!
//! ## Value conventions
//! - **Axes:** translation and rotation are normalized to `[-1.0, 1.0]`
//!   (raw counts divided by the configured full scale, then clamped).
//! - **Buttons:** 0-based index into the device's button mask; every strict
//!   change of state produces one [`ButtonChange`].
//! - **Timestamps:** monotonic [`Instant`] captured when the report was read.
//!   Within one connection, timestamps never go backwards.
//!
//! Events are move-only. A popped event belongs to the caller; nothing else
//! holds a copy of it.

use std::fmt;
use std::time::Instant;

use crate::device::DeviceDescriptor;
use crate::error::NdofError;

/// Discriminant of a [`DeviceEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceEventKind {
    Empty,
    Connected,
    Disconnected,
    Motion,
    ButtonChange,
}

impl fmt::Display for DeviceEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceEventKind::Empty => "empty",
            DeviceEventKind::Connected => "connected",
            DeviceEventKind::Disconnected => "disconnected",
            DeviceEventKind::Motion => "motion",
            DeviceEventKind::ButtonChange => "button-change",
        };
        f.write_str(name)
    }
}

/// Six-axis motion sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Motion {
    pub tx: f32,
    pub ty: f32,
    pub tz: f32,
    pub rx: f32,
    pub ry: f32,
    pub rz: f32,
    pub at: Instant,
}

impl Motion {
    pub fn translation(&self) -> [f32; 3] {
        [self.tx, self.ty, self.tz]
    }

    pub fn rotation(&self) -> [f32; 3] {
        [self.rx, self.ry, self.rz]
    }

    /// True when every axis is at rest.
    pub fn is_idle(&self) -> bool {
        self.translation()
            .iter()
            .chain(self.rotation().iter())
            .all(|v| *v == 0.0)
    }
}

/// Pressed (`Down`) or neutral (`Up`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ButtonState {
    Up,
    Down,
}

/// Strict change of one button's state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ButtonChange {
    pub button: u16,
    pub state: ButtonState,
    pub at: Instant,
}

/// One event from an NDOF device.
#[derive(Debug, Default)]
pub enum DeviceEvent {
    /// Nothing to report; what `pop()` returns on an empty queue.
    #[default]
    Empty,
    /// The connection was bound to this device.
    Connected(DeviceDescriptor),
    /// The bound device went away.
    Disconnected,
    Motion(Motion),
    ButtonChange(ButtonChange),
}

impl DeviceEvent {
    pub fn kind(&self) -> DeviceEventKind {
        match self {
            DeviceEvent::Empty => DeviceEventKind::Empty,
            DeviceEvent::Connected(_) => DeviceEventKind::Connected,
            DeviceEvent::Disconnected => DeviceEventKind::Disconnected,
            DeviceEvent::Motion(_) => DeviceEventKind::Motion,
            DeviceEvent::ButtonChange(_) => DeviceEventKind::ButtonChange,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, DeviceEvent::Empty)
    }

    /// The connected device. Fails with `TypeMismatch` on any other variant.
    pub fn device(&self) -> Result<&DeviceDescriptor, NdofError> {
        match self {
            DeviceEvent::Connected(descriptor) => Ok(descriptor),
            other => Err(other.mismatch(DeviceEventKind::Connected)),
        }
    }

    /// The motion sample. Fails with `TypeMismatch` on any other variant.
    pub fn motion(&self) -> Result<&Motion, NdofError> {
        match self {
            DeviceEvent::Motion(motion) => Ok(motion),
            other => Err(other.mismatch(DeviceEventKind::Motion)),
        }
    }

    /// The button change. Fails with `TypeMismatch` on any other variant.
    pub fn button_change(&self) -> Result<&ButtonChange, NdofError> {
        match self {
            DeviceEvent::ButtonChange(change) => Ok(change),
            other => Err(other.mismatch(DeviceEventKind::ButtonChange)),
        }
    }

    /// Capture time for motion and button events.
    pub fn at(&self) -> Option<Instant> {
        match self {
            DeviceEvent::Motion(m) => Some(m.at),
            DeviceEvent::ButtonChange(b) => Some(b.at),
            _ => None,
        }
    }

    fn mismatch(&self, expected: DeviceEventKind) -> NdofError {
        NdofError::TypeMismatch {
            expected,
            actual: self.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn motion() -> DeviceEvent {
        DeviceEvent::Motion(Motion {
            tx: 0.5,
            ty: 0.0,
            tz: -0.25,
            rx: 0.0,
            ry: 0.0,
            rz: 1.0,
            at: Instant::now(),
        })
    }

    #[test]
    fn test_button_accessor_on_motion_is_type_mismatch() {
        let event = motion();
        match event.button_change() {
            Err(NdofError::TypeMismatch { expected, actual }) => {
                assert_eq!(expected, DeviceEventKind::ButtonChange);
                assert_eq!(actual, DeviceEventKind::Motion);
            }
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_matching_accessor_succeeds() {
        let event = motion();
        let m = event.motion().unwrap();
        assert_eq!(m.translation(), [0.5, 0.0, -0.25]);
        assert_eq!(m.rotation(), [0.0, 0.0, 1.0]);
        assert!(event.device().is_err());
    }

    #[test]
    fn test_default_is_empty() {
        let event = DeviceEvent::default();
        assert!(event.is_empty());
        assert_eq!(event.kind(), DeviceEventKind::Empty);
        assert!(event.at().is_none());
        assert!(matches!(
            event.motion(),
            Err(NdofError::TypeMismatch {
                actual: DeviceEventKind::Empty,
                ..
            })
        ));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(DeviceEventKind::ButtonChange.to_string(), "button-change");
    }
}
