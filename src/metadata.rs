//! Known NDOF device models.
//!
//! The report layout of a 3D mouse is not discoverable from the enumeration
//! record alone, so the crate carries a small catalogue keyed by VID/PID.
//! Applications can extend it from [`Config::devices`](crate::config::Config::devices);
//! configured entries take precedence over the built-in ones.
//!
//! # Layouts
//! - [`ReportLayout::Split`]: older cabled devices. Report `0x01` carries
//!   translation, report `0x02` rotation, report `0x03` the button mask.
//! - [`ReportLayout::Combined`]: newer and wireless devices. Report `0x01`
//!   carries all six axes, report `0x03` the button mask.
//!
//! Devices that are not in the catalogue are decoded as `Combined`.

use serde::{Deserialize, Serialize};

/// Logitech vendor id used by the first generation of 3Dconnexion devices.
pub const VID_LOGITECH: u16 = 0x046d;
/// 3Dconnexion vendor id.
pub const VID_3DCONNEXION: u16 = 0x256f;

/// How a device splits its six axes across input reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportLayout {
    Split,
    #[default]
    Combined,
}

/// A catalogue entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceModel {
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: String,
    #[serde(default)]
    pub layout: ReportLayout,
}

const BUILTIN: &[(u16, u16, &str, ReportLayout)] = &[
    (VID_LOGITECH, 0xc603, "SpaceMouse Plus XT", ReportLayout::Split),
    (VID_LOGITECH, 0xc605, "CadMan", ReportLayout::Split),
    (VID_LOGITECH, 0xc606, "SpaceMouse Classic", ReportLayout::Split),
    (VID_LOGITECH, 0xc621, "SpaceBall 5000", ReportLayout::Split),
    (VID_LOGITECH, 0xc623, "SpaceTraveler", ReportLayout::Split),
    (VID_LOGITECH, 0xc625, "SpacePilot", ReportLayout::Split),
    (VID_LOGITECH, 0xc626, "SpaceNavigator", ReportLayout::Split),
    (VID_LOGITECH, 0xc627, "SpaceExplorer", ReportLayout::Split),
    (VID_LOGITECH, 0xc628, "SpaceNavigator for Notebooks", ReportLayout::Split),
    (VID_LOGITECH, 0xc629, "SpacePilot Pro", ReportLayout::Split),
    (VID_LOGITECH, 0xc62b, "SpaceMouse Pro", ReportLayout::Split),
    (VID_3DCONNEXION, 0xc62e, "SpaceMouse Wireless (cabled)", ReportLayout::Combined),
    (VID_3DCONNEXION, 0xc62f, "SpaceMouse Wireless", ReportLayout::Combined),
    (VID_3DCONNEXION, 0xc631, "SpaceMouse Pro Wireless (cabled)", ReportLayout::Combined),
    (VID_3DCONNEXION, 0xc632, "SpaceMouse Pro Wireless", ReportLayout::Combined),
    (VID_3DCONNEXION, 0xc633, "SpaceMouse Enterprise", ReportLayout::Combined),
    (VID_3DCONNEXION, 0xc635, "SpaceMouse Compact", ReportLayout::Split),
    (VID_3DCONNEXION, 0xc652, "3Dconnexion Universal Receiver", ReportLayout::Combined),
];

/// VID/PID lookup over configured and built-in models.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    extra: Vec<DeviceModel>,
}

impl Catalog {
    /// Catalogue with only the built-in models.
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Catalogue where `extra` shadows built-in entries with the same VID/PID.
    pub fn with_models(extra: Vec<DeviceModel>) -> Self {
        Self { extra }
    }

    pub fn lookup(&self, vendor_id: u16, product_id: u16) -> Option<DeviceModel> {
        if let Some(model) = self
            .extra
            .iter()
            .find(|m| m.vendor_id == vendor_id && m.product_id == product_id)
        {
            return Some(model.clone());
        }
        BUILTIN
            .iter()
            .find(|(v, p, _, _)| *v == vendor_id && *p == product_id)
            .map(|&(vendor_id, product_id, name, layout)| DeviceModel {
                vendor_id,
                product_id,
                name: name.to_string(),
                layout,
            })
    }

    pub fn contains(&self, vendor_id: u16, product_id: u16) -> bool {
        self.lookup(vendor_id, product_id).is_some()
    }

    pub fn layout_for(&self, vendor_id: u16, product_id: u16) -> ReportLayout {
        self.lookup(vendor_id, product_id)
            .map(|m| m.layout)
            .unwrap_or_default()
    }
}
