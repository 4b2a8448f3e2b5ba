//! Device construction from TOML configuration.
//!
//! A device table names the board and lists its subdevices; `build` turns
//! it into a ready [`MeDevice`] over the mock backend. Hardware backends
//! are attached through [`DeviceConfig::build_with_backend`] by whoever
//! owns the bus access.
//!
//! # Example Configuration
//!
//! ```toml
//! name = "me4680"
//! mock = true
//!
//! [[subdevice]]
//! kind = "analog_input"
//! channels = 16
//! fifo_depth = 2048
//!
//! [[subdevice]]
//! kind = "analog_output"
//! channels = 4
//! fifo_depth = 1024
//!
//! [[subdevice]]
//! kind = "external_interrupt"
//! channels = 1
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::backend::HardwareBackend;
use crate::device::MeDevice;
use crate::error::{MeError, Result};
use crate::mock::MockBackend;
use crate::types::{SubdeviceCaps, SubdeviceKind, TriggerCaps};

fn default_name() -> String {
    "me4680".to_string()
}

fn default_channels() -> u32 {
    16
}

fn default_fifo_depth() -> usize {
    2048
}

/// One subdevice entry of a device table.
#[derive(Debug, Clone, Deserialize)]
pub struct SubdeviceConfig {
    /// Subdevice kind
    pub kind: SubdeviceKind,

    /// Number of channels (or interrupt lines)
    #[serde(default = "default_channels")]
    pub channels: u32,

    /// Hardware FIFO depth in samples
    #[serde(default = "default_fifo_depth")]
    pub fifo_depth: usize,
}

impl SubdeviceConfig {
    fn to_caps(&self) -> SubdeviceCaps {
        match self.kind {
            SubdeviceKind::AnalogInput => SubdeviceCaps::analog_input(self.channels, self.fifo_depth),
            SubdeviceKind::AnalogOutput => {
                SubdeviceCaps::analog_output(self.channels, self.fifo_depth)
            }
            SubdeviceKind::ExternalInterrupt => SubdeviceCaps::external_interrupt(self.channels),
            SubdeviceKind::DigitalIo => SubdeviceCaps::digital_io(self.channels),
            SubdeviceKind::DigitalInput => SubdeviceCaps {
                kind: SubdeviceKind::DigitalInput,
                channel_count: self.channels,
                fifo_depth: self.fifo_depth,
                triggers: TriggerCaps::streaming_input(),
                single_sample: false,
                irq_capable: false,
            },
            SubdeviceKind::DigitalOutput => SubdeviceCaps {
                kind: SubdeviceKind::DigitalOutput,
                channel_count: self.channels,
                fifo_depth: self.fifo_depth,
                triggers: TriggerCaps::streaming_output(),
                single_sample: false,
                irq_capable: false,
            },
            SubdeviceKind::Counter => SubdeviceCaps {
                kind: SubdeviceKind::Counter,
                channel_count: self.channels,
                fifo_depth: 0,
                triggers: TriggerCaps::none(),
                single_sample: true,
                irq_capable: false,
            },
        }
    }
}

/// Top-level device table.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Device name
    #[serde(default = "default_name")]
    pub name: String,

    /// Use the simulated backend instead of real hardware
    #[serde(default)]
    pub mock: bool,

    /// Subdevice layout, in index order
    #[serde(rename = "subdevice", default)]
    pub subdevices: Vec<SubdeviceConfig>,
}

impl DeviceConfig {
    /// Parse a device table from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: DeviceConfig = toml::from_str(text).map_err(|e| MeError::Config {
            message: format!("parsing device table: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a device table from a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| MeError::Config {
            message: format!("reading {}: {e}", path.display()),
        })?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.subdevices.is_empty() {
            return Err(MeError::Config {
                message: "device table lists no subdevices".to_string(),
            });
        }
        for (index, sub) in self.subdevices.iter().enumerate() {
            if sub.channels == 0 {
                return Err(MeError::Config {
                    message: format!("subdevice {index} has zero channels"),
                });
            }
        }
        Ok(())
    }

    /// Build the device over the mock backend. Fails unless `mock = true`;
    /// real boards need a bus-owning backend passed to
    /// [`build_with_backend`](Self::build_with_backend).
    pub fn build(&self) -> Result<MeDevice> {
        if !self.mock {
            return Err(MeError::NotSupported {
                message: format!(
                    "device {} requires a hardware backend; only mock = true builds directly",
                    self.name
                ),
            });
        }
        self.build_with_backend(Arc::new(MockBackend::new()))
    }

    /// Build the device over a caller-supplied backend.
    pub fn build_with_backend(&self, backend: Arc<dyn HardwareBackend>) -> Result<MeDevice> {
        let layout: Vec<SubdeviceCaps> = self.subdevices.iter().map(|s| s.to_caps()).collect();
        info!(device = %self.name, subdevices = layout.len(), "building device from table");
        Ok(MeDevice::new(self.name.clone(), layout, backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TABLE: &str = r#"
        name = "me4680"
        mock = true

        [[subdevice]]
        kind = "analog_input"
        channels = 16
        fifo_depth = 2048

        [[subdevice]]
        kind = "analog_output"
        channels = 4
        fifo_depth = 1024

        [[subdevice]]
        kind = "external_interrupt"
        channels = 1
    "#;

    #[test]
    fn test_parse_device_table() {
        let config = DeviceConfig::from_toml_str(TABLE).unwrap();
        assert_eq!(config.name, "me4680");
        assert!(config.mock);
        assert_eq!(config.subdevices.len(), 3);
        assert_eq!(config.subdevices[0].kind, SubdeviceKind::AnalogInput);
        assert_eq!(config.subdevices[2].channels, 1);
    }

    #[test]
    fn test_defaults_applied() {
        let config = DeviceConfig::from_toml_str(
            r#"
            mock = true
            [[subdevice]]
            kind = "analog_input"
            "#,
        )
        .unwrap();
        assert_eq!(config.name, "me4680");
        assert_eq!(config.subdevices[0].channels, 16);
        assert_eq!(config.subdevices[0].fifo_depth, 2048);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = DeviceConfig::from_toml_str(
            r#"
            [[subdevice]]
            kind = "flux_capacitor"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, MeError::Config { .. }));
    }

    #[test]
    fn test_empty_table_rejected() {
        assert!(DeviceConfig::from_toml_str("mock = true").is_err());
    }

    #[test]
    fn test_build_requires_mock() {
        let config = DeviceConfig::from_toml_str(
            r#"
            [[subdevice]]
            kind = "analog_input"
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.build(),
            Err(MeError::NotSupported { .. })
        ));
    }

    #[test]
    fn test_build_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TABLE.as_bytes()).unwrap();
        let config = DeviceConfig::from_path(file.path()).unwrap();
        let device = config.build().unwrap();
        assert_eq!(device.subdevice_count(), 3);
        assert_eq!(device.subdevice_caps(0).unwrap().channel_count, 16);
        assert!(device.subdevice_caps(2).unwrap().irq_capable);
    }
}
