//! Trigger specification and validation.
//!
//! A [`TriggerSpec`] carries five independent trigger slots: acquisition
//! start, scan start, convert start, scan stop and acquisition stop. Each
//! slot names a trigger type, an edge (for external digital triggers) and a
//! 64-bit argument that is a timer period in ticks for `Timer` slots or a
//! count for `Count` stop slots.
//!
//! Validation is pure: it either returns a normalized copy of the spec or
//! fails, and it runs before any subdevice state is mutated.

use crate::error::{MeError, Result};
use crate::types::{SubdeviceCaps, TriggerTypeSet};

/// Condition that starts or stops a phase of the acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerType {
    /// Slot unused; for stop slots: run until explicitly stopped
    #[default]
    None,
    /// Immediate start issued by software
    Software,
    /// Edge on an external digital trigger line
    ExternalDigital,
    /// Internal timer with a tick period
    Timer,
    /// Scan starts immediately after the acquisition starts
    /// (legal for the scan-start slot only)
    Follow,
    /// Stop after a fixed count (stop slots only)
    Count,
}

/// Edge qualifier for external digital triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerEdge {
    #[default]
    None,
    Rising,
    Falling,
    Any,
}

/// Trigger channel selection for the acquisition start slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerChannel {
    /// Start this subdevice alone
    #[default]
    Default,
    /// Start on the shared synchronous trigger line, together with every
    /// other subdevice armed on it
    Synchronous,
}

/// Assemble a 64-bit tick count from the 32-bit halves used on the wire.
pub fn ticks_from_halves(low: u32, high: u32) -> u64 {
    (u64::from(high) << 32) | u64::from(low)
}

/// One trigger slot of a [`TriggerSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerSlot {
    /// Trigger type for this slot
    pub kind: TriggerType,
    /// Edge qualifier; meaningful only for [`TriggerType::ExternalDigital`]
    pub edge: TriggerEdge,
    /// Timer period in ticks, or the count for `Count` stop slots
    pub ticks: u64,
}

impl TriggerSlot {
    /// Unused slot.
    pub fn none() -> Self {
        Self::default()
    }

    /// Software trigger.
    pub fn software() -> Self {
        Self {
            kind: TriggerType::Software,
            ..Self::default()
        }
    }

    /// Timer trigger with a period in ticks.
    pub fn timer(ticks: u64) -> Self {
        Self {
            kind: TriggerType::Timer,
            edge: TriggerEdge::None,
            ticks,
        }
    }

    /// External digital trigger on the given edge.
    pub fn external(edge: TriggerEdge) -> Self {
        Self {
            kind: TriggerType::ExternalDigital,
            edge,
            ticks: 0,
        }
    }

    /// Follow trigger (scan-start slot only).
    pub fn follow() -> Self {
        Self {
            kind: TriggerType::Follow,
            ..Self::default()
        }
    }

    /// Count-type stop after `count` units.
    pub fn count(count: u64) -> Self {
        Self {
            kind: TriggerType::Count,
            edge: TriggerEdge::None,
            ticks: count,
        }
    }
}

/// Full trigger configuration of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerSpec {
    /// Acquisition start condition
    pub acq_start: TriggerSlot,
    /// Trigger channel for the acquisition start (default or synchronous)
    pub start_channel: TriggerChannel,
    /// Scan start condition
    pub scan_start: TriggerSlot,
    /// Convert (per-sample) timing
    pub conv_start: TriggerSlot,
    /// Scan stop condition: `None` or `Count` of samples per scan
    pub scan_stop: TriggerSlot,
    /// Acquisition stop condition: `None` (run until stopped) or `Count`
    /// of scans
    pub acq_stop: TriggerSlot,
}

impl TriggerSpec {
    /// Software-started acquisition with a convert timer: the common case of
    /// "start now, sample every `conv_ticks` ticks, run until stopped".
    pub fn timed(conv_ticks: u64) -> Self {
        Self {
            acq_start: TriggerSlot::software(),
            start_channel: TriggerChannel::Default,
            scan_start: TriggerSlot::follow(),
            conv_start: TriggerSlot::timer(conv_ticks),
            scan_stop: TriggerSlot::none(),
            acq_stop: TriggerSlot::none(),
        }
    }

    /// Replace the acquisition start slot.
    pub fn with_start(mut self, slot: TriggerSlot) -> Self {
        self.acq_start = slot;
        self
    }

    /// Use a timer for the scan-start slot instead of `Follow`.
    pub fn with_scan_timer(mut self, ticks: u64) -> Self {
        self.scan_start = TriggerSlot::timer(ticks);
        self
    }

    /// Stop the acquisition after `scans` complete scans.
    pub fn with_stop_count(mut self, scans: u64) -> Self {
        self.acq_stop = TriggerSlot::count(scans);
        self
    }

    /// Stop each scan after `samples` samples.
    pub fn with_scan_stop_count(mut self, samples: u64) -> Self {
        self.scan_stop = TriggerSlot::count(samples);
        self
    }

    /// Arm on the shared synchronous trigger line.
    pub fn synchronous(mut self) -> Self {
        self.start_channel = TriggerChannel::Synchronous;
        self
    }

    /// Validate the spec against a subdevice's capability set and return a
    /// normalized copy.
    ///
    /// Normalization clears edge qualifiers on non-external slots and tick
    /// arguments on slots that do not use them; it never changes the meaning
    /// of a valid spec.
    pub fn validate(&self, caps: &SubdeviceCaps) -> Result<TriggerSpec> {
        check_slot_supported("acquisition start", self.acq_start, caps.triggers.acq_start)?;
        check_slot_supported("scan start", self.scan_start, caps.triggers.scan_start)?;
        check_slot_supported("convert start", self.conv_start, caps.triggers.conv_start)?;
        check_slot_supported("scan stop", self.scan_stop, caps.triggers.scan_stop)?;
        check_slot_supported("acquisition stop", self.acq_stop, caps.triggers.acq_stop)?;

        // A stream needs something to start it, unless the subdevice is a
        // single-sample subtype.
        if !caps.single_sample
            && self.acq_start.kind == TriggerType::None
            && self.scan_start.kind == TriggerType::None
        {
            return Err(MeError::invalid_trigger(
                "acquisition start and scan start cannot both be none",
            ));
        }

        // Follow means "scan starts right after the acquisition starts" and
        // makes no sense anywhere else.
        for (name, slot) in [
            ("acquisition start", self.acq_start),
            ("convert start", self.conv_start),
            ("scan stop", self.scan_stop),
            ("acquisition stop", self.acq_stop),
        ] {
            if slot.kind == TriggerType::Follow {
                return Err(MeError::invalid_trigger(format!(
                    "follow trigger is only legal for scan start, not {name}"
                )));
            }
        }

        // Count belongs to the stop side.
        for (name, slot) in [
            ("acquisition start", self.acq_start),
            ("scan start", self.scan_start),
            ("convert start", self.conv_start),
        ] {
            if slot.kind == TriggerType::Count {
                return Err(MeError::invalid_trigger(format!(
                    "count trigger is not legal for {name}"
                )));
            }
        }
        for (name, slot) in [
            ("scan stop", self.scan_stop),
            ("acquisition stop", self.acq_stop),
        ] {
            match slot.kind {
                TriggerType::None | TriggerType::Count => {}
                other => {
                    return Err(MeError::invalid_trigger(format!(
                        "{name} must be none or count, not {other:?}"
                    )))
                }
            }
            if slot.kind == TriggerType::Count && slot.ticks == 0 {
                return Err(MeError::invalid_trigger(format!(
                    "{name} count must be greater than zero"
                )));
            }
        }

        // External digital triggers need a concrete edge; timer periods are
        // periods, so zero is rejected.
        for (name, slot) in [
            ("acquisition start", self.acq_start),
            ("scan start", self.scan_start),
            ("convert start", self.conv_start),
        ] {
            match slot.kind {
                TriggerType::ExternalDigital if slot.edge == TriggerEdge::None => {
                    return Err(MeError::invalid_trigger(format!(
                        "{name} external trigger requires an edge"
                    )));
                }
                TriggerType::Timer if slot.ticks == 0 => {
                    return Err(MeError::invalid_trigger(format!(
                        "{name} timer period must be greater than zero ticks"
                    )));
                }
                _ => {}
            }
        }

        // Synchronous arming waits on the acquisition start trigger, so
        // there has to be one.
        if self.start_channel == TriggerChannel::Synchronous
            && self.acq_start.kind == TriggerType::None
        {
            return Err(MeError::invalid_trigger(
                "synchronous start requires an acquisition start trigger",
            ));
        }

        let mut normalized = *self;
        for slot in [
            &mut normalized.acq_start,
            &mut normalized.scan_start,
            &mut normalized.conv_start,
            &mut normalized.scan_stop,
            &mut normalized.acq_stop,
        ] {
            if slot.kind != TriggerType::ExternalDigital {
                slot.edge = TriggerEdge::None;
            }
            if !matches!(slot.kind, TriggerType::Timer | TriggerType::Count) {
                slot.ticks = 0;
            }
        }
        Ok(normalized)
    }

    /// Number of scans after which the acquisition stops by itself, if any.
    pub fn stop_scan_count(&self) -> Option<u64> {
        match self.acq_stop.kind {
            TriggerType::Count => Some(self.acq_stop.ticks),
            _ => None,
        }
    }

    /// Whether the acquisition start is tied to the synchronous trigger line.
    pub fn is_synchronous(&self) -> bool {
        self.start_channel == TriggerChannel::Synchronous
    }
}

fn check_slot_supported(name: &str, slot: TriggerSlot, supported: TriggerTypeSet) -> Result<()> {
    if slot.kind == TriggerType::None && supported.is_empty() {
        // Subdevices without stream support report empty sets; an unused
        // slot is always acceptable there.
        return Ok(());
    }
    if !supported.allows(slot.kind) {
        return Err(MeError::invalid_trigger(format!(
            "{name} trigger type {:?} not supported by this subdevice",
            slot.kind
        )));
    }
    Ok(())
}
