//! Common types for the streaming engine: subdevice identity and state,
//! stream I/O modes, flag words, and capability descriptions.
//!
//! Raw samples are device words ([`Sample`]); conversion to physical units
//! happens in a separate layer and is not part of this engine.

use bitflags::bitflags;
use serde::Deserialize;

use crate::trigger::TriggerType;

/// One raw sample as transferred to or from the hardware FIFO.
pub type Sample = u32;

/// Kind of an acquisition-capable unit on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubdeviceKind {
    AnalogInput,
    AnalogOutput,
    DigitalInput,
    DigitalOutput,
    DigitalIo,
    ExternalInterrupt,
    Counter,
}

impl SubdeviceKind {
    /// Direction of streamed data for this subdevice kind, if it streams.
    pub fn stream_direction(self) -> Option<StreamDirection> {
        match self {
            Self::AnalogInput | Self::DigitalInput => Some(StreamDirection::Input),
            Self::AnalogOutput | Self::DigitalOutput => Some(StreamDirection::Output),
            Self::DigitalIo => Some(StreamDirection::Input),
            Self::ExternalInterrupt | Self::Counter => None,
        }
    }
}

/// Direction of sample flow between the application and the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    /// Hardware produces, application reads
    Input,
    /// Application writes, hardware consumes
    Output,
}

/// Lifecycle state of a subdevice.
///
/// Transitions happen only through engine operations: `configure` moves
/// Idle -> Configured, a released start trigger moves Configured -> Running,
/// and stop (explicit or trigger-defined) moves Running -> Stopping -> back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubdeviceState {
    /// No stream configuration present
    #[default]
    Idle,
    /// Configured and ready to arm
    Configured,
    /// Acquisition or output in progress
    Running,
    /// Stop requested, hardware winding down
    Stopping,
}

/// Blocking behavior of a stream read call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Suspend until at least one sample is available, the stream ends,
    /// or the timeout elapses
    Blocking,
    /// Return immediately with whatever is available, possibly nothing
    NonBlocking,
}

/// Blocking behavior of a stream write call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Suspend while the buffer is full; return once every sample is
    /// accepted or the stream leaves the Running state
    Blocking,
    /// Copy as much as free capacity allows and return immediately
    NonBlocking,
    /// Pre-fill the buffer before a synchronized start; legal outside the
    /// Running state
    Preload,
}

/// Blocking behavior of a start or stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Start: wait for the stop condition. Stop: wait for hardware quiesce.
    Blocking,
    /// Return once arming / trigger release / cancel is issued
    NonBlocking,
}

/// Analog reference mode of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reference {
    /// Single-ended against analog ground
    #[default]
    Ground,
    /// Differential pair
    Differential,
    /// No reference (digital channels)
    None,
}

bitflags! {
    /// Flags accepted by stream configuration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConfigFlags: u32 {
        /// Output buffer is cyclic: hardware re-reads the preloaded block
        /// instead of consuming it
        const WRAPAROUND = 1 << 1;
        /// Samples carry a raw digital bit pattern rather than channel data
        const BIT_PATTERN = 1 << 0;
    }
}

bitflags! {
    /// Flags accepted by stream stop.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StopFlags: u32 {
        /// Keep buffered-but-unread samples readable after the stop
        const PRESERVE_BUFFERS = 1 << 0;
    }
}

bitflags! {
    /// Flags accepted by interrupt arming.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IrqFlags: u32 {
        /// Status word carries extended (device family specific) bits
        const EXTENDED_STATUS = 1 << 0;
    }
}

bitflags! {
    /// Set of trigger types a subdevice supports for one trigger slot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TriggerTypeSet: u32 {
        const NONE = 1 << 0;
        const SOFTWARE = 1 << 1;
        const EXT_DIGITAL = 1 << 2;
        const TIMER = 1 << 3;
        const FOLLOW = 1 << 4;
        const COUNT = 1 << 5;
    }
}

impl TriggerTypeSet {
    /// Check whether a concrete trigger type is a member of this set.
    pub fn allows(self, kind: TriggerType) -> bool {
        let bit = match kind {
            TriggerType::None => Self::NONE,
            TriggerType::Software => Self::SOFTWARE,
            TriggerType::ExternalDigital => Self::EXT_DIGITAL,
            TriggerType::Timer => Self::TIMER,
            TriggerType::Follow => Self::FOLLOW,
            TriggerType::Count => Self::COUNT,
        };
        self.contains(bit)
    }
}

/// Supported trigger types per slot, as reported by the enumeration layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerCaps {
    pub acq_start: TriggerTypeSet,
    pub scan_start: TriggerTypeSet,
    pub conv_start: TriggerTypeSet,
    pub scan_stop: TriggerTypeSet,
    pub acq_stop: TriggerTypeSet,
}

impl TriggerCaps {
    /// Capability set of a typical streaming analog input (ME-4600 style).
    pub fn streaming_input() -> Self {
        Self {
            acq_start: TriggerTypeSet::SOFTWARE
                | TriggerTypeSet::EXT_DIGITAL
                | TriggerTypeSet::TIMER,
            scan_start: TriggerTypeSet::FOLLOW | TriggerTypeSet::TIMER | TriggerTypeSet::EXT_DIGITAL,
            conv_start: TriggerTypeSet::TIMER | TriggerTypeSet::EXT_DIGITAL,
            scan_stop: TriggerTypeSet::NONE | TriggerTypeSet::COUNT,
            acq_stop: TriggerTypeSet::NONE | TriggerTypeSet::COUNT,
        }
    }

    /// Capability set of a typical streaming analog output.
    pub fn streaming_output() -> Self {
        Self {
            acq_start: TriggerTypeSet::SOFTWARE
                | TriggerTypeSet::EXT_DIGITAL
                | TriggerTypeSet::TIMER,
            scan_start: TriggerTypeSet::FOLLOW | TriggerTypeSet::TIMER,
            conv_start: TriggerTypeSet::TIMER,
            scan_stop: TriggerTypeSet::NONE | TriggerTypeSet::COUNT,
            acq_stop: TriggerTypeSet::NONE | TriggerTypeSet::COUNT,
        }
    }

    /// Capability set of a subdevice without stream support.
    pub fn none() -> Self {
        Self {
            acq_start: TriggerTypeSet::empty(),
            scan_start: TriggerTypeSet::empty(),
            conv_start: TriggerTypeSet::empty(),
            scan_stop: TriggerTypeSet::empty(),
            acq_stop: TriggerTypeSet::empty(),
        }
    }
}

/// Static description of one subdevice, consumed from the enumeration layer.
#[derive(Debug, Clone)]
pub struct SubdeviceCaps {
    /// What the subdevice is
    pub kind: SubdeviceKind,
    /// Number of addressable channels
    pub channel_count: u32,
    /// Hardware FIFO depth in samples (informational)
    pub fifo_depth: usize,
    /// Trigger types supported per slot
    pub triggers: TriggerCaps,
    /// Single-sample subtype: no scan timing, one value per operation
    pub single_sample: bool,
    /// Whether the subdevice can raise interrupt events
    pub irq_capable: bool,
}

impl SubdeviceCaps {
    /// Streaming analog input with `channels` channels.
    pub fn analog_input(channels: u32, fifo_depth: usize) -> Self {
        Self {
            kind: SubdeviceKind::AnalogInput,
            channel_count: channels,
            fifo_depth,
            triggers: TriggerCaps::streaming_input(),
            single_sample: false,
            irq_capable: false,
        }
    }

    /// Streaming analog output with `channels` channels.
    pub fn analog_output(channels: u32, fifo_depth: usize) -> Self {
        Self {
            kind: SubdeviceKind::AnalogOutput,
            channel_count: channels,
            fifo_depth,
            triggers: TriggerCaps::streaming_output(),
            single_sample: false,
            irq_capable: false,
        }
    }

    /// External interrupt input with `lines` lines.
    pub fn external_interrupt(lines: u32) -> Self {
        Self {
            kind: SubdeviceKind::ExternalInterrupt,
            channel_count: lines,
            fifo_depth: 0,
            triggers: TriggerCaps::none(),
            single_sample: true,
            irq_capable: true,
        }
    }

    /// Digital I/O port that can also raise line interrupts.
    pub fn digital_io(lines: u32) -> Self {
        Self {
            kind: SubdeviceKind::DigitalIo,
            channel_count: lines,
            fifo_depth: 0,
            triggers: TriggerCaps::none(),
            single_sample: true,
            irq_capable: true,
        }
    }

    /// Whether the subdevice supports buffered streaming at all.
    pub fn supports_streaming(&self) -> bool {
        !self.single_sample && self.kind.stream_direction().is_some()
    }
}

/// Per-channel entry of a stream configuration. The order of entries defines
/// the sample interleave order within a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Channel index on the subdevice
    pub channel: u32,
    /// Range/gain selector (index into the subdevice's range table)
    pub range: u32,
    /// Reference mode
    pub reference: Reference,
}

impl ChannelConfig {
    /// Channel with default range and ground reference.
    pub fn new(channel: u32) -> Self {
        Self {
            channel,
            range: 0,
            reference: Reference::Ground,
        }
    }

    /// Select a range index.
    pub fn with_range(mut self, range: u32) -> Self {
        self.range = range;
        self
    }

    /// Select a reference mode.
    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = reference;
        self
    }
}
