//! Safe Rust port of the Meilhaus ME-iDS streaming acquisition engine.
//!
//! This crate implements the logical core of an ME-series DAQ driver stack:
//! trigger configuration and validation, ring-buffered stream read/write
//! with blocking and non-blocking modes, atomic synchronized start and stop
//! across subdevices, and ordered callback dispatch on hardware interrupt
//! events. Board-specific register access plugs in behind the
//! [`HardwareBackend`] trait; a [`MockBackend`] is included for tests and
//! simulation.
//!
//! # Architecture
//!
//! ## Device Access
//! - [`MeDevice`] - Device handle: subdevice lookup, capability queries,
//!   the interrupt API, and the driver-wide exclusive handle
//! - [`DeviceConfig`] - TOML device table describing the subdevice layout
//!
//! ## Streaming
//! - [`TriggerSpec`] - Five-slot trigger configuration with validation
//! - `MeDevice::stream_config` / `stream_read` / `stream_write` /
//!   `stream_status` - Buffered stream I/O
//! - [`StartRequest`] / [`StopRequest`] - Synchronized start/stop entries
//!
//! ## Interrupt Events
//! - `MeDevice::irq_start` / `irq_wait` / `irq_set_callback` / `irq_stop`
//! - [`IrqEvent`] - One delivered event: monotonic count, value, status
//!
//! # Examples
//!
//! ## Timed Acquisition With a Stop Count
//!
//! ```
//! use daq_driver_meilhaus::{
//!     ChannelConfig, ConfigFlags, DeviceConfig, ReadMode, StartRequest, TriggerSpec,
//! };
//! use std::time::Duration;
//!
//! # fn example() -> daq_driver_meilhaus::Result<()> {
//! let device = DeviceConfig::from_toml_str(
//!     r#"
//!     mock = true
//!     [[subdevice]]
//!     kind = "analog_input"
//!     channels = 16
//!     "#,
//! )?
//! .build()?;
//!
//! // 2 channels, 1 kHz convert timer, stop after 100 scans.
//! let trigger = TriggerSpec::timed(daq_driver_meilhaus::timing::frequency_to_ticks(1000.0)?)
//!     .with_stop_count(100);
//! device.stream_config(
//!     0,
//!     &[ChannelConfig::new(0), ChannelConfig::new(1)],
//!     &trigger,
//!     4096,
//!     ConfigFlags::empty(),
//! )?;
//! device.stream_start(&[
//!     StartRequest::blocking(0).with_timeout(Duration::from_secs(10))
//! ])?;
//! let samples = device.stream_read(0, ReadMode::NonBlocking, 200, None)?;
//! assert_eq!(samples.len(), 200);
//! # Ok(())
//! # }
//! ```
//!
//! ## Waiting for Interrupt Events
//!
//! ```no_run
//! use daq_driver_meilhaus::{DeviceConfig, IrqFlags, IrqSource, TriggerEdge};
//! use std::time::Duration;
//!
//! # fn example() -> daq_driver_meilhaus::Result<()> {
//! let device = DeviceConfig::from_toml_str(
//!     r#"
//!     mock = true
//!     [[subdevice]]
//!     kind = "external_interrupt"
//!     channels = 1
//!     "#,
//! )?
//! .build()?;
//!
//! device.irq_start(0, 0, IrqSource::Line, TriggerEdge::Rising, IrqFlags::empty())?;
//! let event = device.irq_wait(0, 0, Some(Duration::from_secs(1)))?;
//! println!("event #{}: value {:#x}", event.count, event.value);
//! device.irq_stop(0, 0, IrqFlags::empty())?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod buffer;
pub mod control;
pub mod device;
pub mod error;
pub mod factory;
pub mod guard;
pub mod irq;
pub mod mock;
pub mod stream;
pub mod subdevice;
pub mod timing;
pub mod trigger;
pub mod types;

pub use backend::{EngineHooks, HardwareBackend};
pub use buffer::{BufferCounters, SampleBuffer};
pub use control::{StartRequest, StopRequest};
pub use device::{DriverLockGuard, MeDevice};
pub use error::{MeError, Result};
pub use factory::{DeviceConfig, SubdeviceConfig};
pub use irq::{CallbackToken, IrqCallbackArgs, IrqEvent, IrqSource};
pub use mock::MockBackend;
pub use stream::StreamStatus;
pub use subdevice::{StreamError, StreamSetup, Subdevice};
pub use trigger::{TriggerChannel, TriggerEdge, TriggerSlot, TriggerSpec, TriggerType};
pub use types::{
    ChannelConfig, ConfigFlags, IrqFlags, ReadMode, Reference, Sample, StopFlags, StreamDirection,
    SubdeviceCaps, SubdeviceKind, SubdeviceState, TriggerCaps, TriggerTypeSet, WaitMode, WriteMode,
};
