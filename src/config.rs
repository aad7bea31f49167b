//! Runtime configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config:
//!
//! ```toml
//! queue_capacity = 512
//! enumerate_interval_ms = 500
//!
//! [[devices]]
//! vendor_id = 0x256f
//! product_id = 0xc6ff
//! name = "Prototype"
//! layout = "split"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::DEFAULT_AXIS_SCALE;
use crate::error::NdofError;
use crate::metadata::{Catalog, DeviceModel};
use crate::queue::DEFAULT_QUEUE_CAPACITY;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-connection queue capacity (minimum 1).
    pub queue_capacity: usize,
    /// Sleep between ticks when a tick read nothing (minimum 1).
    pub poll_interval_ms: u64,
    /// Upper bound on the first read of each device per tick.
    pub read_timeout_ms: u64,
    /// Reports drained from one device per tick before moving on
    /// (minimum 1).
    pub max_reports_per_tick: usize,
    /// How often the backend is re-enumerated. `0` means every tick.
    pub enumerate_interval_ms: u64,
    /// Consecutive read errors after which a device is treated as gone.
    pub max_read_failures: u32,
    /// How long a device that failed to open (or kept failing reads) is
    /// left alone before the next open attempt.
    pub reopen_backoff_ms: u64,
    /// Raw axis count that maps to full deflection.
    pub axis_scale: f32,
    /// Extra device models, taking precedence over the built-in catalogue.
    pub devices: Vec<DeviceModel>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval_ms: 2,
            read_timeout_ms: 1,
            max_reports_per_tick: 32,
            enumerate_interval_ms: 250,
            max_read_failures: 3,
            reopen_backoff_ms: 1000,
            axis_scale: DEFAULT_AXIS_SCALE,
            devices: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, NdofError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, NdofError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| NdofError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn catalog(&self) -> Catalog {
        Catalog::with_models(self.devices.clone())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn reports_per_tick(&self) -> usize {
        self.max_reports_per_tick.max(1)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn enumerate_interval(&self) -> Duration {
        Duration::from_millis(self.enumerate_interval_ms)
    }

    pub fn reopen_backoff(&self) -> Duration {
        Duration::from_millis(self.reopen_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ReportLayout;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_override_and_devices() {
        let config = Config::from_toml_str(
            r#"
            queue_capacity = 8
            enumerate_interval_ms = 0

            [[devices]]
            vendor_id = 0x0167
            product_id = 0x003d
            name = "Bench rig"
            layout = "split"
            "#,
        )
        .unwrap();

        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.enumerate_interval(), Duration::ZERO);
        assert_eq!(config.max_read_failures, 3);
        assert_eq!(config.catalog().layout_for(0x0167, 0x003d), ReportLayout::Split);
    }

    #[test]
    fn test_layout_defaults_to_combined() {
        let config = Config::from_toml_str(
            r#"
            [[devices]]
            vendor_id = 1
            product_id = 2
            name = "x"
            "#,
        )
        .unwrap();
        assert_eq!(config.devices[0].layout, ReportLayout::Combined);
    }

    #[test]
    fn test_zero_limits_are_clamped() {
        let config = Config::from_toml_str(
            r#"
            poll_interval_ms = 0
            max_reports_per_tick = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
        assert_eq!(config.reports_per_tick(), 1);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            Config::from_toml_str("queue_capacity = \"lots\""),
            Err(NdofError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::load("/nonexistent/ndof.toml"),
            Err(NdofError::ConfigIo { .. })
        ));
    }
}
