//! Hardware abstraction seam between the acquisition engine and a board
//! implementation.
//!
//! A [`HardwareBackend`] programs registers and drives the data path; the
//! engine owns all policy (state machine, buffering, blocking semantics).
//! On attach the backend receives an [`EngineHooks`] handle, the only
//! surface its interrupt-equivalent path may touch: filling and draining
//! stream buffers, reporting completion or faults, and posting interrupt
//! notifications for the dispatcher thread.

use std::sync::mpsc;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::irq::{DispatchMsg, IrqNotice, IrqSource};
use crate::subdevice::{StreamError, StreamSetup, Subdevice};
use crate::trigger::TriggerEdge;
use crate::types::{IrqFlags, Sample, StreamDirection, SubdeviceState};

/// Board-side driver interface.
///
/// All methods take `&self`; implementations manage their own interior
/// mutability and must be callable from multiple engine threads.
pub trait HardwareBackend: Send + Sync {
    /// Human-readable backend name, used in logs.
    fn name(&self) -> &str;

    /// Called once when the device is built, before any other method.
    fn attach(&self, hooks: EngineHooks);

    /// Program the stream parameters of a subdevice. The engine has already
    /// validated channels and triggers against the capability description.
    fn configure_stream(&self, subdevice: u32, setup: &StreamSetup) -> Result<()>;

    /// Arm a configured subdevice. After a successful arm the subdevice
    /// reacts to its start trigger; on failure it must be left unarmed.
    fn arm(&self, subdevice: u32) -> Result<()>;

    /// Roll back a successful arm without starting the stream.
    fn disarm(&self, subdevice: u32) -> Result<()>;

    /// Deliver the software start trigger to a set of armed subdevices at
    /// once. Called with every listed subdevice armed.
    fn release_trigger(&self, subdevices: &[u32]) -> Result<()>;

    /// Stop the data path of a running subdevice. Must be idempotent; the
    /// hardware path may race with the stop and lose.
    fn cancel(&self, subdevice: u32) -> Result<()>;

    /// Enable interrupt generation on a (subdevice, channel) line.
    fn irq_enable(
        &self,
        subdevice: u32,
        channel: u32,
        source: IrqSource,
        edge: TriggerEdge,
        flags: IrqFlags,
    ) -> Result<()>;

    /// Disable interrupt generation on a line.
    fn irq_disable(&self, subdevice: u32, channel: u32) -> Result<()>;
}

/// Engine surface handed to the backend at attach time.
///
/// Cheap to clone; backends keep a copy for their data-path threads. Every
/// method is safe to call from any thread and never blocks on application
/// I/O.
#[derive(Clone)]
pub struct EngineHooks {
    subdevices: Arc<Vec<Arc<Subdevice>>>,
    irq_tx: Arc<Mutex<mpsc::Sender<DispatchMsg>>>,
}

impl EngineHooks {
    pub(crate) fn new(
        subdevices: Arc<Vec<Arc<Subdevice>>>,
        irq_tx: mpsc::Sender<DispatchMsg>,
    ) -> Self {
        Self {
            subdevices,
            irq_tx: Arc::new(Mutex::new(irq_tx)),
        }
    }

    fn subdevice(&self, index: u32) -> Option<&Arc<Subdevice>> {
        self.subdevices.get(index as usize)
    }

    /// Stream direction of a subdevice, from its capability description.
    pub fn stream_direction(&self, subdevice: u32) -> Option<StreamDirection> {
        self.subdevice(subdevice)
            .and_then(|sub| sub.caps().kind.stream_direction())
    }

    /// Whether the subdevice is still in the Running state. Data-path
    /// threads poll this to notice stops.
    pub fn is_running(&self, subdevice: u32) -> bool {
        self.subdevice(subdevice)
            .is_some_and(|sub| sub.state() == SubdeviceState::Running)
    }

    /// Push acquired samples into the stream buffer of an input subdevice.
    ///
    /// If the samples do not fit, the acquisition has outrun the consumer:
    /// the stream is failed with an overflow and `false` is returned, after
    /// which the backend must stop producing for this subdevice.
    pub fn fill_stream(&self, subdevice: u32, samples: &[Sample]) -> bool {
        let Some(sub) = self.subdevice(subdevice) else {
            return false;
        };
        match sub.buffer.fill_from_hw(samples) {
            Ok(()) => true,
            Err(_) => {
                sub.fail_stream(StreamError::Overflow);
                false
            }
        }
    }

    /// Pull up to `max` samples from the stream buffer of an output
    /// subdevice. In wraparound mode the preloaded block repeats and this
    /// never runs dry.
    pub fn drain_stream(&self, subdevice: u32, max: usize) -> Vec<Sample> {
        match self.subdevice(subdevice) {
            Some(sub) => sub.buffer.drain_to_hw(max),
            None => Vec::new(),
        }
    }

    /// Report that the stream reached its trigger-defined stop condition.
    pub fn stream_complete(&self, subdevice: u32) {
        if let Some(sub) = self.subdevice(subdevice) {
            sub.complete_stream();
        }
    }

    /// Report a register or bus fault on the data path.
    pub fn stream_fault(&self, subdevice: u32) {
        if let Some(sub) = self.subdevice(subdevice) {
            sub.fail_stream(StreamError::Hardware);
        }
    }

    /// Hand an interrupt notification to the dispatcher thread. Never runs
    /// callbacks inline; returns immediately.
    pub fn post_irq(&self, subdevice: u32, channel: u32, value: u32, status: u32) {
        let notice = IrqNotice {
            subdevice,
            channel,
            value,
            status,
        };
        // A send failure means the device is tearing down; the event is
        // dropped with it.
        if self
            .irq_tx
            .lock()
            .send(DispatchMsg::Event(notice))
            .is_err()
        {
            debug!(?notice, "irq event dropped during teardown");
        }
    }
}
