//! Per-subdevice runtime state: control block, stream buffer and run
//! monitor.
//!
//! A [`Subdevice`] aggregates everything the engine owns for one
//! acquisition-capable unit: its capability description, the guarded
//! control block (state machine plus the active stream setup), the circular
//! sample buffer, and a monitor that blocking start calls park on until the
//! stream stops.

use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use crate::buffer::SampleBuffer;
use crate::error::{MeError, Result};
use crate::guard::SubdeviceLock;
use crate::trigger::TriggerSpec;
use crate::types::{ChannelConfig, ConfigFlags, SubdeviceCaps, SubdeviceState};

/// Stream parameters fixed at configuration time.
#[derive(Debug, Clone)]
pub struct StreamSetup {
    /// Channel list; entry order defines the interleave order within a scan
    pub channels: Vec<ChannelConfig>,
    /// Normalized trigger specification
    pub trigger: TriggerSpec,
    /// Configuration flags
    pub flags: ConfigFlags,
    /// Buffer capacity in samples
    pub capacity: usize,
}

/// Sticky stream error recorded for status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// Hardware produced faster than the application consumed
    Overflow,
    /// Backend reported a register or bus fault mid-stream
    Hardware,
}

/// Guarded mutable state of one subdevice.
#[derive(Debug, Default)]
pub struct SubdeviceControl {
    pub state: SubdeviceState,
    pub setup: Option<StreamSetup>,
    pub error: Option<StreamError>,
}

/// Monotonic stop-event counter that blocking start calls wait on.
///
/// Every transition out of the Running state bumps the sequence and wakes
/// all waiters; a waiter that captured the sequence while the stream was
/// still Running can therefore never miss the stop.
pub(crate) struct RunMonitor {
    seq: Mutex<u64>,
    cv: Condvar,
}

impl RunMonitor {
    fn new() -> Self {
        Self {
            seq: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    /// Current stop sequence number.
    pub(crate) fn stop_seq(&self) -> u64 {
        *self.seq.lock()
    }

    /// Record a transition out of Running and wake all waiters.
    pub(crate) fn notify_stopped(&self) {
        let mut seq = self.seq.lock();
        *seq += 1;
        self.cv.notify_all();
    }

    /// Block until a stop later than `observed` is recorded or the deadline
    /// passes.
    pub(crate) fn wait_stopped_since(
        &self,
        observed: u64,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let mut seq = self.seq.lock();
        while *seq <= observed {
            match deadline {
                Some(at) => {
                    if self.cv.wait_until(&mut seq, at).timed_out() {
                        return Err(MeError::Timeout);
                    }
                }
                None => self.cv.wait(&mut seq),
            }
        }
        Ok(())
    }
}

/// One acquisition-capable unit of the device.
pub struct Subdevice {
    index: u32,
    caps: SubdeviceCaps,
    pub(crate) control: SubdeviceLock<SubdeviceControl>,
    pub(crate) buffer: SampleBuffer,
    pub(crate) monitor: RunMonitor,
}

impl Subdevice {
    pub(crate) fn new(index: u32, caps: SubdeviceCaps) -> Self {
        Self {
            index,
            caps,
            control: SubdeviceLock::new(SubdeviceControl::default()),
            buffer: SampleBuffer::new(index),
            monitor: RunMonitor::new(),
        }
    }

    /// Index of this subdevice on its device.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Static capability description.
    pub fn caps(&self) -> &SubdeviceCaps {
        &self.caps
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubdeviceState {
        self.control.read().state
    }

    /// Natural end of stream reached (trigger-defined stop count satisfied).
    /// Remaining buffered samples stay readable in the Configured state.
    pub(crate) fn complete_stream(&self) {
        let mut control = self.control.write();
        if control.state != SubdeviceState::Running {
            return;
        }
        control.state = SubdeviceState::Configured;
        drop(control);
        self.buffer.finish();
        self.monitor.notify_stopped();
        info!(subdevice = self.index, "stream completed");
    }

    /// Mid-stream failure reported from the hardware path. The stream ends;
    /// samples acquired so far stay readable and the error is recorded for
    /// status queries.
    pub(crate) fn fail_stream(&self, error: StreamError) {
        let mut control = self.control.write();
        if control.state != SubdeviceState::Running {
            return;
        }
        control.state = SubdeviceState::Configured;
        control.error = Some(error);
        drop(control);
        self.buffer.finish();
        self.monitor.notify_stopped();
        warn!(subdevice = self.index, ?error, "stream failed");
    }
}
