//! Error types

use std::path::PathBuf;

use thiserror::Error;

use crate::device::DeviceId;
use crate::event::DeviceEventKind;

/// Reasons a raw HID report could not be decoded.
///
/// Decode failures are per-report: the dispatcher counts them, drops the
/// report and keeps polling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty report")]
    Empty,

    #[error("unknown report id 0x{0:02X}")]
    UnknownReport(u8),

    #[error("report 0x{report_id:02X} too short: expected {expected} payload bytes, got {actual}")]
    Truncated {
        report_id: u8,
        expected: usize,
        actual: usize,
    },
}

/// Errors surfaced by the NDOF manager, its dispatcher and backends.
#[derive(Error, Debug)]
pub enum NdofError {
    #[error("failed to open device {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("HID error: {0}")]
    Hid(String),

    #[error("device removed")]
    DeviceRemoved,

    #[error("HID backend unavailable: {0}")]
    Backend(String),

    #[error("connection is already bound or the device is claimed exclusively")]
    AlreadyBound,

    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),

    #[error("connection #{0} is not registered")]
    UnknownConnection(u64),

    #[error("dispatcher already stopped")]
    AlreadyStopped,

    #[error("event type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: DeviceEventKind,
        actual: DeviceEventKind,
    },

    #[error("failed to spawn dispatcher thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(feature = "hid")]
impl From<hidapi::HidError> for NdofError {
    fn from(e: hidapi::HidError) -> Self {
        NdofError::Hid(e.to_string())
    }
}
