//! Synchronized start and stop across subdevices.
//!
//! Starting is two-phase: every requested subdevice is armed first, and the
//! common trigger is released only once all of them armed. A phase-1
//! failure disarms the members armed so far, so either every subdevice in
//! the request reaches Running or none does. The exclusive control guards
//! of all members are held in ascending index order across both phases; no
//! observer can see a partially started group.
//!
//! Stopping tears one subdevice down at a time: cancel the hardware data
//! path, abort the buffer (waking every blocked read or write), abort
//! pending interrupt waits, and wake blocking start callers through the run
//! monitor. The backend cancel contract is synchronous, so a stop request
//! has quiesced by the time it returns.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::device::MeDevice;
use crate::error::{MeError, Result};
use crate::types::{StopFlags, SubdeviceState, WaitMode};

/// One subdevice entry of a start request list.
#[derive(Debug, Clone, Copy)]
pub struct StartRequest {
    pub subdevice: u32,
    /// Blocking waits for the stream's stop condition after the trigger is
    /// released; non-blocking returns once the trigger is released.
    pub mode: WaitMode,
    /// Deadline for a blocking wait; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl StartRequest {
    /// Start and return immediately after trigger release.
    pub fn nonblocking(subdevice: u32) -> Self {
        Self {
            subdevice,
            mode: WaitMode::NonBlocking,
            timeout: None,
        }
    }

    /// Start and wait for the stream's stop condition.
    pub fn blocking(subdevice: u32) -> Self {
        Self {
            subdevice,
            mode: WaitMode::Blocking,
            timeout: None,
        }
    }

    /// Bound a blocking wait.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// One subdevice entry of a stop request list.
#[derive(Debug, Clone, Copy)]
pub struct StopRequest {
    pub subdevice: u32,
    pub flags: StopFlags,
}

impl StopRequest {
    /// Stop and discard buffered-but-unread samples; the subdevice returns
    /// to Idle.
    pub fn discard(subdevice: u32) -> Self {
        Self {
            subdevice,
            flags: StopFlags::empty(),
        }
    }

    /// Stop but keep buffered samples readable; the subdevice returns to
    /// Configured.
    pub fn preserving(subdevice: u32) -> Self {
        Self {
            subdevice,
            flags: StopFlags::PRESERVE_BUFFERS,
        }
    }
}

impl MeDevice {
    /// Start the requested subdevices as one atomic group.
    ///
    /// Every subdevice must be Configured. Arming happens first for all
    /// members; the shared trigger is released only after every arm
    /// succeeded, and an arm failure rolls back the members already armed.
    /// Blocking entries then wait for their stream's stop condition
    /// (trigger-defined stop count reached, or explicit stop).
    pub fn stream_start(&self, requests: &[StartRequest]) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }
        let mut ordered: Vec<StartRequest> = requests.to_vec();
        ordered.sort_by_key(|r| r.subdevice);
        for pair in ordered.windows(2) {
            if pair[0].subdevice == pair[1].subdevice {
                return Err(MeError::invalid_parameter(format!(
                    "subdevice {} listed twice in start request",
                    pair[0].subdevice
                )));
            }
        }
        let mut members = Vec::with_capacity(ordered.len());
        for request in &ordered {
            members.push((*request, self.subdevice(request.subdevice)?));
        }

        // Guards are taken in ascending index order and held across both
        // phases, so two overlapping group starts cannot deadlock or
        // interleave.
        let mut guards = Vec::with_capacity(members.len());
        for (request, sub) in &members {
            let guard = sub.control.write();
            match guard.state {
                SubdeviceState::Configured => {}
                SubdeviceState::Running | SubdeviceState::Stopping => {
                    return Err(MeError::AlreadyRunning {
                        subdevice: request.subdevice,
                    })
                }
                SubdeviceState::Idle => {
                    return Err(MeError::invalid_state(
                        request.subdevice,
                        SubdeviceState::Idle,
                        "stream is not configured",
                    ))
                }
            }
            guards.push(guard);
        }

        // Phase 1: arm everything without releasing any trigger.
        let indices: Vec<u32> = members.iter().map(|(r, _)| r.subdevice).collect();
        for (armed, (request, _)) in members.iter().enumerate() {
            if let Err(err) = self.backend.arm(request.subdevice) {
                warn!(
                    subdevice = request.subdevice,
                    %err,
                    "arm failed, rolling back armed members"
                );
                for (rollback, _) in &members[..armed] {
                    let _ = self.backend.disarm(rollback.subdevice);
                }
                return Err(err);
            }
        }

        // Phase 2: transition to Running and release the common trigger.
        let mut observed = Vec::with_capacity(members.len());
        for ((_, sub), guard) in members.iter().zip(guards.iter_mut()) {
            sub.buffer.arm();
            guard.state = SubdeviceState::Running;
            guard.error = None;
            observed.push(sub.monitor.stop_seq());
        }
        if let Err(err) = self.backend.release_trigger(&indices) {
            warn!(%err, "trigger release failed, rolling back group");
            for ((request, _), guard) in members.iter().zip(guards.iter_mut()) {
                guard.state = SubdeviceState::Configured;
                let _ = self.backend.disarm(request.subdevice);
            }
            return Err(err);
        }
        info!(subdevices = ?indices, "streams started");
        drop(guards);

        // Phase 3: blocking entries wait for their stop condition.
        for ((request, sub), observed) in members.iter().zip(observed) {
            if request.mode != WaitMode::Blocking {
                continue;
            }
            let deadline = request.timeout.map(|t| Instant::now() + t);
            sub.monitor.wait_stopped_since(observed, deadline)?;
        }
        Ok(())
    }

    /// Stop the requested subdevices, one at a time.
    ///
    /// Every thread blocked in a stream read/write, interrupt wait or
    /// blocking start on a stopped subdevice observes the stop and returns
    /// within bounded time. Stopping an Idle subdevice fails with
    /// `NotRunning`.
    pub fn stream_stop(&self, requests: &[StopRequest]) -> Result<()> {
        for request in requests {
            self.stop_one(request)?;
        }
        Ok(())
    }

    fn stop_one(&self, request: &StopRequest) -> Result<()> {
        let sub = self.subdevice(request.subdevice)?;
        let preserve = request.flags.contains(StopFlags::PRESERVE_BUFFERS);
        let mut control = sub.control.write();
        match control.state {
            SubdeviceState::Running => {
                control.state = SubdeviceState::Stopping;
                // The guard is released while the backend winds down; its
                // data path may be blocked on the control lock.
                drop(control);
                let cancelled = self.backend.cancel(request.subdevice);
                sub.buffer.abort(!preserve);
                self.dispatcher.cancel_subdevice(request.subdevice);

                let mut control = sub.control.write();
                if preserve {
                    control.state = SubdeviceState::Configured;
                } else {
                    control.state = SubdeviceState::Idle;
                    control.setup = None;
                }
                drop(control);
                sub.monitor.notify_stopped();
                info!(subdevice = request.subdevice, preserve, "stream stopped");
                cancelled
            }
            SubdeviceState::Stopping => {
                // A concurrent stop is already winding this subdevice down.
                Ok(())
            }
            SubdeviceState::Configured => {
                if preserve {
                    return Ok(());
                }
                control.state = SubdeviceState::Idle;
                control.setup = None;
                drop(control);
                sub.buffer.abort(true);
                Ok(())
            }
            SubdeviceState::Idle => Err(MeError::NotRunning {
                subdevice: request.subdevice,
            }),
        }
    }
}
