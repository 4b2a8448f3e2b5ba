//! Stream configuration and buffered sample I/O.
//!
//! Configuration validates everything (channels, trigger spec, flags,
//! capacity) before touching hardware or subdevice state. Read and write
//! release the control lock before parking on the buffer, so a concurrent
//! stop can always take exclusive access and cancel the blocked call.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::buffer::BufferCounters;
use crate::device::MeDevice;
use crate::error::{MeError, Result};
use crate::subdevice::{StreamError, StreamSetup};
use crate::trigger::TriggerSpec;
use crate::types::{
    ChannelConfig, ConfigFlags, ReadMode, Sample, StreamDirection, SubdeviceKind, SubdeviceState,
    WriteMode,
};

/// Non-blocking snapshot of one subdevice's stream, as returned by
/// [`MeDevice::stream_status`].
#[derive(Debug, Clone, Copy)]
pub struct StreamStatus {
    /// Lifecycle state at the time of the query
    pub state: SubdeviceState,
    /// Buffer occupancy and monotonic transfer counters
    pub counters: BufferCounters,
    /// Sticky error of the last stream, if it ended abnormally
    pub error: Option<StreamError>,
}

impl MeDevice {
    /// Configure a stream on an Idle subdevice and transition it to
    /// Configured.
    ///
    /// The channel list order defines the sample interleave order within a
    /// scan. Validation is complete before any state changes; a failed
    /// configure leaves the subdevice Idle.
    pub fn stream_config(
        &self,
        subdevice: u32,
        channels: &[ChannelConfig],
        trigger: &TriggerSpec,
        capacity: usize,
        flags: ConfigFlags,
    ) -> Result<()> {
        let sub = self.subdevice(subdevice)?;
        let caps = sub.caps();
        if !caps.supports_streaming() {
            return Err(MeError::NotSupported {
                message: format!("subdevice {subdevice} does not support streaming"),
            });
        }
        let direction = match caps.kind.stream_direction() {
            Some(direction) => direction,
            None => {
                return Err(MeError::NotSupported {
                    message: format!("subdevice {subdevice} has no stream direction"),
                })
            }
        };
        if channels.is_empty() {
            return Err(MeError::invalid_parameter("channel list is empty"));
        }
        for entry in channels {
            if entry.channel >= caps.channel_count {
                return Err(MeError::InvalidChannel {
                    subdevice,
                    channel: entry.channel,
                    max: caps.channel_count,
                });
            }
        }
        if capacity == 0 {
            return Err(MeError::invalid_parameter(
                "buffer capacity must be greater than zero",
            ));
        }
        if flags.contains(ConfigFlags::WRAPAROUND) && direction != StreamDirection::Output {
            return Err(MeError::invalid_parameter(
                "wraparound mode applies to output streams only",
            ));
        }
        if flags.contains(ConfigFlags::BIT_PATTERN) {
            let digital = matches!(
                caps.kind,
                SubdeviceKind::DigitalInput | SubdeviceKind::DigitalOutput | SubdeviceKind::DigitalIo
            );
            if !digital {
                return Err(MeError::invalid_parameter(
                    "bit pattern mode applies to digital subdevices only",
                ));
            }
            // A pattern stream transfers the whole port per sample.
            if channels.len() != 1 {
                return Err(MeError::invalid_parameter(
                    "bit pattern mode takes a single whole-port channel entry",
                ));
            }
        }
        let trigger = trigger.validate(caps)?;

        let mut control = sub.control.write();
        if control.state != SubdeviceState::Idle {
            return Err(MeError::AlreadyRunning { subdevice });
        }
        let setup = StreamSetup {
            channels: channels.to_vec(),
            trigger,
            flags,
            capacity,
        };
        self.backend.configure_stream(subdevice, &setup)?;
        sub.buffer
            .reset(capacity, flags.contains(ConfigFlags::WRAPAROUND));
        control.setup = Some(setup);
        control.error = None;
        control.state = SubdeviceState::Configured;
        debug!(
            subdevice,
            channels = channels.len(),
            capacity,
            ?flags,
            "stream configured"
        );
        Ok(())
    }

    /// Read up to `max` samples from an input stream.
    ///
    /// `Blocking` suspends until at least one sample is available, the
    /// stream ends (empty success), a stop cancels the call, or the timeout
    /// elapses. `NonBlocking` returns whatever is available, possibly
    /// nothing, and never fails for lack of data.
    pub fn stream_read(
        &self,
        subdevice: u32,
        mode: ReadMode,
        max: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<Sample>> {
        let sub = self.subdevice(subdevice)?;
        if sub.caps().kind.stream_direction() != Some(StreamDirection::Input) {
            return Err(MeError::invalid_parameter(format!(
                "subdevice {subdevice} is not an input stream"
            )));
        }
        {
            let control = sub.control.read();
            match control.state {
                SubdeviceState::Configured | SubdeviceState::Running => {}
                state => {
                    return Err(MeError::invalid_state(
                        subdevice,
                        state,
                        "stream is not configured",
                    ))
                }
            }
        }
        if max == 0 {
            return Ok(Vec::new());
        }
        // The control lock is released here; a blocked pop is cancelled
        // through the buffer by stop.
        match mode {
            ReadMode::NonBlocking => Ok(sub.buffer.pop_nonblocking(max)),
            ReadMode::Blocking => {
                let deadline = timeout.map(|t| Instant::now() + t);
                sub.buffer.pop_blocking(max, deadline)
            }
        }
    }

    /// Write samples to an output stream, returning the count accepted.
    ///
    /// `Preload` fills the buffer of a Configured stream before a
    /// synchronized start. `Blocking` suspends while the buffer is full and
    /// returns a partial count if the stream leaves the Running state
    /// first. `NonBlocking` copies what fits and returns immediately.
    pub fn stream_write(
        &self,
        subdevice: u32,
        mode: WriteMode,
        samples: &[Sample],
        timeout: Option<Duration>,
    ) -> Result<usize> {
        let sub = self.subdevice(subdevice)?;
        if sub.caps().kind.stream_direction() != Some(StreamDirection::Output) {
            return Err(MeError::invalid_parameter(format!(
                "subdevice {subdevice} is not an output stream"
            )));
        }
        let state = sub.control.read().state;
        match mode {
            WriteMode::Preload => {
                if state != SubdeviceState::Configured {
                    return Err(MeError::invalid_state(
                        subdevice,
                        state,
                        "preload requires a configured, not yet running stream",
                    ));
                }
                Ok(sub.buffer.push_nonblocking(samples))
            }
            WriteMode::NonBlocking => {
                match state {
                    SubdeviceState::Configured | SubdeviceState::Running => {}
                    state => {
                        return Err(MeError::invalid_state(
                            subdevice,
                            state,
                            "stream is not configured",
                        ))
                    }
                }
                Ok(sub.buffer.push_nonblocking(samples))
            }
            WriteMode::Blocking => {
                match state {
                    SubdeviceState::Configured | SubdeviceState::Running => {}
                    state => {
                        return Err(MeError::invalid_state(
                            subdevice,
                            state,
                            "stream is not configured",
                        ))
                    }
                }
                let deadline = timeout.map(|t| Instant::now() + t);
                sub.buffer.push_blocking(samples, deadline)
            }
        }
    }

    /// Non-blocking stream status query: state, buffer counters and the
    /// sticky error of the last stream, if any.
    pub fn stream_status(&self, subdevice: u32) -> Result<StreamStatus> {
        let sub = self.subdevice(subdevice)?;
        let control = sub.control.read();
        Ok(StreamStatus {
            state: control.state,
            counters: sub.buffer.counters(),
            error: control.error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use crate::types::{SubdeviceCaps, TriggerCaps};
    use std::sync::Arc;

    fn device() -> MeDevice {
        MeDevice::new(
            "me4680-test",
            vec![
                SubdeviceCaps::analog_input(16, 2048),
                SubdeviceCaps::analog_output(4, 1024),
            ],
            Arc::new(MockBackend::new()),
        )
    }

    fn channels(n: u32) -> Vec<ChannelConfig> {
        (0..n).map(ChannelConfig::new).collect()
    }

    #[test]
    fn test_configure_transitions_to_configured() {
        let dev = device();
        dev.stream_config(
            0,
            &channels(2),
            &TriggerSpec::timed(33_000),
            1024,
            ConfigFlags::empty(),
        )
        .unwrap();
        assert_eq!(dev.subdevice_state(0).unwrap(), SubdeviceState::Configured);
    }

    #[test]
    fn test_configure_rejects_bad_channel() {
        let dev = device();
        let err = dev
            .stream_config(
                0,
                &[ChannelConfig::new(16)],
                &TriggerSpec::timed(33_000),
                1024,
                ConfigFlags::empty(),
            )
            .unwrap_err();
        assert!(matches!(err, MeError::InvalidChannel { channel: 16, .. }));
        assert_eq!(dev.subdevice_state(0).unwrap(), SubdeviceState::Idle);
    }

    #[test]
    fn test_configure_rejects_zero_capacity_and_empty_channels() {
        let dev = device();
        assert!(dev
            .stream_config(
                0,
                &channels(1),
                &TriggerSpec::timed(33_000),
                0,
                ConfigFlags::empty()
            )
            .is_err());
        assert!(dev
            .stream_config(
                0,
                &[],
                &TriggerSpec::timed(33_000),
                1024,
                ConfigFlags::empty()
            )
            .is_err());
    }

    #[test]
    fn test_configure_twice_requires_idle() {
        let dev = device();
        let trigger = TriggerSpec::timed(33_000);
        dev.stream_config(0, &channels(1), &trigger, 1024, ConfigFlags::empty())
            .unwrap();
        assert!(matches!(
            dev.stream_config(0, &channels(1), &trigger, 1024, ConfigFlags::empty()),
            Err(MeError::AlreadyRunning { subdevice: 0 })
        ));
    }

    #[test]
    fn test_wraparound_rejected_on_input() {
        let dev = device();
        assert!(dev
            .stream_config(
                0,
                &channels(1),
                &TriggerSpec::timed(33_000),
                1024,
                ConfigFlags::WRAPAROUND
            )
            .is_err());
        assert!(dev
            .stream_config(
                1,
                &channels(1),
                &TriggerSpec::timed(33_000),
                1024,
                ConfigFlags::WRAPAROUND
            )
            .is_ok());
    }

    #[test]
    fn test_bit_pattern_requires_whole_digital_port() {
        let dev = MeDevice::new(
            "me4680-test",
            vec![
                SubdeviceCaps::analog_input(16, 2048),
                SubdeviceCaps {
                    kind: SubdeviceKind::DigitalInput,
                    channel_count: 8,
                    fifo_depth: 64,
                    triggers: TriggerCaps::streaming_input(),
                    single_sample: false,
                    irq_capable: false,
                },
            ],
            Arc::new(MockBackend::new()),
        );
        let trigger = TriggerSpec::timed(33_000);
        // Analog inputs stream per-channel data, never a bit pattern.
        assert!(dev
            .stream_config(0, &channels(1), &trigger, 64, ConfigFlags::BIT_PATTERN)
            .is_err());
        // The pattern covers the whole port; a multi-entry list is rejected.
        assert!(dev
            .stream_config(1, &channels(2), &trigger, 64, ConfigFlags::BIT_PATTERN)
            .is_err());
        dev.stream_config(1, &channels(1), &trigger, 64, ConfigFlags::BIT_PATTERN)
            .unwrap();
        assert_eq!(dev.subdevice_state(1).unwrap(), SubdeviceState::Configured);
    }

    #[test]
    fn test_read_requires_configured_state() {
        let dev = device();
        let err = dev
            .stream_read(0, ReadMode::NonBlocking, 16, None)
            .unwrap_err();
        assert!(matches!(err, MeError::InvalidState { .. }));
    }

    #[test]
    fn test_read_on_output_subdevice_rejected() {
        let dev = device();
        assert!(dev.stream_read(1, ReadMode::NonBlocking, 16, None).is_err());
        assert!(dev
            .stream_write(0, WriteMode::NonBlocking, &[1], None)
            .is_err());
    }

    #[test]
    fn test_nonblocking_read_before_start_is_empty_success() {
        let dev = device();
        dev.stream_config(
            0,
            &channels(2),
            &TriggerSpec::timed(33_000),
            1024,
            ConfigFlags::empty(),
        )
        .unwrap();
        let samples = dev.stream_read(0, ReadMode::NonBlocking, 64, None).unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn test_preload_fills_configured_output() {
        let dev = device();
        dev.stream_config(
            1,
            &channels(1),
            &TriggerSpec::timed(33_000),
            8,
            ConfigFlags::empty(),
        )
        .unwrap();
        let written = dev
            .stream_write(1, WriteMode::Preload, &[1, 2, 3, 4], None)
            .unwrap();
        assert_eq!(written, 4);
        assert_eq!(dev.stream_status(1).unwrap().counters.occupancy, 4);
    }

    #[test]
    fn test_status_reports_counters() {
        let dev = device();
        dev.stream_config(
            1,
            &channels(1),
            &TriggerSpec::timed(33_000),
            16,
            ConfigFlags::empty(),
        )
        .unwrap();
        dev.stream_write(1, WriteMode::Preload, &[9, 9], None)
            .unwrap();
        let status = dev.stream_status(1).unwrap();
        assert_eq!(status.state, SubdeviceState::Configured);
        assert_eq!(status.counters.produced, 2);
        assert_eq!(status.counters.consumed, 0);
        assert!(status.error.is_none());
    }
}
