//! Device aggregate and interrupt API surface.
//!
//! [`MeDevice`] ties a backend, the per-subdevice runtime state and the
//! interrupt dispatcher together. Stream operations live in the `stream`
//! and `control` modules; this module provides construction, lookup,
//! capability and status queries, the driver-wide exclusive handle, and the
//! interrupt operations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::backend::{EngineHooks, HardwareBackend};
use crate::error::{MeError, Result};
use crate::irq::{CallbackToken, IrqCallbackArgs, IrqDispatcher, IrqEvent, IrqSource};
use crate::subdevice::Subdevice;
use crate::trigger::TriggerEdge;
use crate::types::{IrqFlags, SubdeviceCaps, SubdeviceState};

/// One ME board: a set of subdevices behind a hardware backend.
pub struct MeDevice {
    name: String,
    subdevices: Arc<Vec<Arc<Subdevice>>>,
    pub(crate) backend: Arc<dyn HardwareBackend>,
    pub(crate) dispatcher: IrqDispatcher,
    exclusive: Mutex<()>,
}

/// RAII handle for driver-wide exclusive access. Configuration sequences
/// that must not interleave with other callers hold one of these; it is
/// released on drop on every exit path.
pub struct DriverLockGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl MeDevice {
    /// Build a device over `backend` with the given subdevice layout.
    /// Attaches the engine hooks before returning, so the backend can use
    /// its data path immediately.
    pub fn new(
        name: impl Into<String>,
        layout: Vec<SubdeviceCaps>,
        backend: Arc<dyn HardwareBackend>,
    ) -> Self {
        let name = name.into();
        let subdevices: Arc<Vec<Arc<Subdevice>>> = Arc::new(
            layout
                .into_iter()
                .enumerate()
                .map(|(index, caps)| Arc::new(Subdevice::new(index as u32, caps)))
                .collect(),
        );
        let dispatcher = IrqDispatcher::new();
        backend.attach(EngineHooks::new(Arc::clone(&subdevices), dispatcher.sender()));
        info!(
            device = %name,
            backend = backend.name(),
            subdevices = subdevices.len(),
            "device opened"
        );
        Self {
            name,
            subdevices,
            backend,
            dispatcher,
            exclusive: Mutex::new(()),
        }
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of subdevices on this device.
    pub fn subdevice_count(&self) -> u32 {
        self.subdevices.len() as u32
    }

    pub(crate) fn subdevice(&self, index: u32) -> Result<&Arc<Subdevice>> {
        self.subdevices
            .get(index as usize)
            .ok_or(MeError::InvalidSubdevice {
                subdevice: index,
                count: self.subdevices.len() as u32,
            })
    }

    /// Capability description of a subdevice.
    pub fn subdevice_caps(&self, index: u32) -> Result<&SubdeviceCaps> {
        Ok(self.subdevice(index)?.caps())
    }

    /// Current lifecycle state of a subdevice.
    pub fn subdevice_state(&self, index: u32) -> Result<SubdeviceState> {
        Ok(self.subdevice(index)?.state())
    }

    /// Take the driver-wide exclusive handle. Blocks until no other holder
    /// remains.
    pub fn exclusive(&self) -> DriverLockGuard<'_> {
        DriverLockGuard {
            _guard: self.exclusive.lock(),
        }
    }

    fn check_irq_line(&self, subdevice: u32, channel: u32) -> Result<()> {
        let sub = self.subdevice(subdevice)?;
        if !sub.caps().irq_capable {
            return Err(MeError::NotSupported {
                message: format!("subdevice {subdevice} cannot raise interrupt events"),
            });
        }
        if channel >= sub.caps().channel_count {
            return Err(MeError::InvalidChannel {
                subdevice,
                channel,
                max: sub.caps().channel_count,
            });
        }
        Ok(())
    }

    /// Arm interrupt delivery on a (subdevice, channel) line.
    ///
    /// Fails with `AlreadyRunning` if the line is armed. On a backend
    /// failure the line is left disarmed.
    pub fn irq_start(
        &self,
        subdevice: u32,
        channel: u32,
        source: IrqSource,
        edge: TriggerEdge,
        flags: IrqFlags,
    ) -> Result<()> {
        self.check_irq_line(subdevice, channel)?;
        match source {
            IrqSource::Line | IrqSource::Default => {
                if edge == TriggerEdge::None {
                    return Err(MeError::invalid_parameter(
                        "line interrupt requires an edge",
                    ));
                }
            }
            IrqSource::Pattern | IrqSource::Mask | IrqSource::OverTemperature => {
                if edge != TriggerEdge::None {
                    return Err(MeError::invalid_parameter(format!(
                        "{source:?} interrupt source does not take an edge"
                    )));
                }
            }
        }

        self.dispatcher
            .arm(subdevice, channel, flags.contains(IrqFlags::EXTENDED_STATUS))?;
        if let Err(err) = self
            .backend
            .irq_enable(subdevice, channel, source, edge, flags)
        {
            let _ = self.dispatcher.disarm(subdevice, channel);
            return Err(err);
        }
        debug!(subdevice, channel, ?source, ?edge, "irq started");
        Ok(())
    }

    /// Block until the next interrupt event on the line, an `irq_stop` or
    /// stream stop aborts the wait, or the timeout elapses.
    pub fn irq_wait(
        &self,
        subdevice: u32,
        channel: u32,
        timeout: Option<Duration>,
    ) -> Result<IrqEvent> {
        self.check_irq_line(subdevice, channel)?;
        let deadline = timeout.map(|t| Instant::now() + t);
        self.dispatcher.wait(subdevice, channel, deadline)
    }

    /// Register a callback for interrupt events on the line. Callbacks run
    /// on the dispatcher thread, in registration order, one at a time.
    pub fn irq_set_callback<F>(
        &self,
        subdevice: u32,
        channel: u32,
        callback: F,
    ) -> Result<CallbackToken>
    where
        F: Fn(&IrqCallbackArgs) + Send + Sync + 'static,
    {
        self.check_irq_line(subdevice, channel)?;
        Ok(self
            .dispatcher
            .add_callback(subdevice, channel, Arc::new(callback)))
    }

    /// Remove a callback registration. Removing a token that no longer
    /// matches anything is a no-op success.
    pub fn irq_remove_callback(&self, token: CallbackToken) {
        self.dispatcher.remove_callback(token);
    }

    /// Disarm a line, waking and aborting blocked `irq_wait` callers.
    /// Fails with `NotRunning` if the line is not armed.
    pub fn irq_stop(&self, subdevice: u32, channel: u32, flags: IrqFlags) -> Result<()> {
        self.check_irq_line(subdevice, channel)?;
        if !flags.is_empty() {
            return Err(MeError::invalid_parameter("irq stop accepts no flags"));
        }
        self.dispatcher.disarm(subdevice, channel)?;
        self.backend.irq_disable(subdevice, channel)?;
        debug!(subdevice, channel, "irq stopped");
        Ok(())
    }
}
