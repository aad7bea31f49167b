//! Report decoding.
//!
//! Turns one raw input report (report id in byte 0) into zero or more
//! [`DeviceEvent`]s. Decoding is pure apart from the per-device
//! [`DecodeContext`], which remembers the last axis halves and button mask
//! so that split motion reports and button edges can be reconstructed.
//!
//! Report formats (all axis values little-endian `i16`):
//! - `0x01` translation `[01, x, x, y, y, z, z]`, or on combined devices
//!   `[01, tx.., ty.., tz.., rx.., ry.., rz..]`
//! - `0x02` rotation `[02, rx, rx, ry, ry, rz, rz]` (split devices only)
//! - `0x03` buttons `[03, mask0, mask1, ...]`, bit `n` = button `n`

use std::time::Instant;

use crate::error::DecodeError;
use crate::event::{ButtonChange, ButtonState, DeviceEvent, Motion};
use crate::metadata::ReportLayout;

pub mod report_id {
    pub const TRANSLATION: u8 = 0x01;
    pub const ROTATION: u8 = 0x02;
    pub const BUTTONS: u8 = 0x03;
}

const HALF_AXES_LEN: usize = 6;
const FULL_AXES_LEN: usize = 12;
/// Only the first four mask bytes are tracked.
const MAX_BUTTON_BYTES: usize = 4;

/// Raw axis value that maps to full deflection.
pub const DEFAULT_AXIS_SCALE: f32 = 350.0;

/// Per-device decoding state.
#[derive(Clone, Debug)]
pub struct DecodeContext {
    layout: ReportLayout,
    axis_scale: f32,
    translation: [f32; 3],
    rotation: [f32; 3],
    buttons: u32,
}

impl DecodeContext {
    pub fn new(layout: ReportLayout, axis_scale: f32) -> Self {
        let axis_scale = if axis_scale > 0.0 {
            axis_scale
        } else {
            DEFAULT_AXIS_SCALE
        };
        Self {
            layout,
            axis_scale,
            translation: [0.0; 3],
            rotation: [0.0; 3],
            buttons: 0,
        }
    }

    pub fn layout(&self) -> ReportLayout {
        self.layout
    }

    /// Current button mask as last reported.
    pub fn buttons(&self) -> u32 {
        self.buttons
    }

    fn axes(&self, bytes: &[u8]) -> [f32; 3] {
        let mut out = [0.0; 3];
        for (i, v) in out.iter_mut().enumerate() {
            let raw = i16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]);
            *v = (f32::from(raw) / self.axis_scale).clamp(-1.0, 1.0);
        }
        out
    }

    fn motion(&self, at: Instant) -> DeviceEvent {
        let [tx, ty, tz] = self.translation;
        let [rx, ry, rz] = self.rotation;
        DeviceEvent::Motion(Motion {
            tx,
            ty,
            tz,
            rx,
            ry,
            rz,
            at,
        })
    }
}

fn require(report_id: u8, payload: &[u8], expected: usize) -> Result<(), DecodeError> {
    if payload.len() < expected {
        return Err(DecodeError::Truncated {
            report_id,
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

/// Decode one report. On error the context is left untouched.
pub fn decode(
    ctx: &mut DecodeContext,
    report: &[u8],
    at: Instant,
) -> Result<Vec<DeviceEvent>, DecodeError> {
    let (&id, payload) = report.split_first().ok_or(DecodeError::Empty)?;

    match (id, ctx.layout) {
        (report_id::TRANSLATION, ReportLayout::Combined) => {
            require(id, payload, FULL_AXES_LEN)?;
            ctx.translation = ctx.axes(&payload[..HALF_AXES_LEN]);
            ctx.rotation = ctx.axes(&payload[HALF_AXES_LEN..FULL_AXES_LEN]);
            Ok(vec![ctx.motion(at)])
        }
        (report_id::TRANSLATION, ReportLayout::Split) => {
            require(id, payload, HALF_AXES_LEN)?;
            ctx.translation = ctx.axes(payload);
            Ok(vec![ctx.motion(at)])
        }
        (report_id::ROTATION, ReportLayout::Split) => {
            require(id, payload, HALF_AXES_LEN)?;
            ctx.rotation = ctx.axes(payload);
            Ok(vec![ctx.motion(at)])
        }
        (report_id::BUTTONS, _) => {
            require(id, payload, 1)?;
            let mut mask_bytes = [0u8; MAX_BUTTON_BYTES];
            let n = payload.len().min(MAX_BUTTON_BYTES);
            mask_bytes[..n].copy_from_slice(&payload[..n]);
            let mask = u32::from_le_bytes(mask_bytes);

            let changed = mask ^ ctx.buttons;
            ctx.buttons = mask;
            Ok((0..32u16)
                .filter(|bit| changed & (1 << bit) != 0)
                .map(|bit| {
                    let state = if mask & (1 << bit) != 0 {
                        ButtonState::Down
                    } else {
                        ButtonState::Up
                    };
                    DeviceEvent::ButtonChange(ButtonChange {
                        button: bit,
                        state,
                        at,
                    })
                })
                .collect())
        }
        _ => Err(DecodeError::UnknownReport(id)),
    }
}

/// Build a combined-layout motion report from raw axis counts.
pub fn encode_motion(translation: [i16; 3], rotation: [i16; 3]) -> Vec<u8> {
    let mut report = Vec::with_capacity(1 + FULL_AXES_LEN);
    report.push(report_id::TRANSLATION);
    for v in translation.iter().chain(rotation.iter()) {
        report.extend_from_slice(&v.to_le_bytes());
    }
    report
}

/// Build a button report carrying `mask`.
pub fn encode_buttons(mask: u32) -> Vec<u8> {
    let mut report = vec![report_id::BUTTONS];
    report.extend_from_slice(&mask.to_le_bytes());
    report
}
