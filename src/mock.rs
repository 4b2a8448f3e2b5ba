//! Simulated hardware backend.
//!
//! `MockBackend` fakes an ME board well enough to drive the whole engine in
//! tests: trigger release spawns one data-path thread per started
//! subdevice, input threads synthesize ramp-plus-noise scans at an
//! accelerated rate and honor a count-type acquisition stop, output threads
//! drain the stream buffer and report completion when it runs dry.
//! [`pulse_irq`](MockBackend::pulse_irq) injects interrupt events, and
//! [`fail_arm`](MockBackend::fail_arm) makes arming fail on selected
//! subdevices to exercise the all-or-none start rollback.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tracing::debug;

use crate::backend::{EngineHooks, HardwareBackend};
use crate::error::{MeError, Result};
use crate::irq::IrqSource;
use crate::subdevice::StreamSetup;
use crate::trigger::TriggerEdge;
use crate::types::{ConfigFlags, IrqFlags, Sample, StreamDirection};

/// Simulated scan period. Real boards pace scans from the 33 MHz timer;
/// the mock just has to be fast enough for tests and slow enough to let
/// blocking calls actually block.
const SCAN_PERIOD: Duration = Duration::from_micros(500);

#[derive(Default)]
struct Inner {
    hooks: Option<EngineHooks>,
    setups: HashMap<u32, StreamSetup>,
    armed: HashSet<u32>,
    fail_arm: HashSet<u32>,
    held: HashSet<u32>,
    irq_lines: HashSet<(u32, u32)>,
    stops: HashMap<u32, Arc<AtomicBool>>,
    workers: HashMap<u32, JoinHandle<()>>,
}

/// In-process fake of an ME board.
#[derive(Default)]
pub struct MockBackend {
    inner: Mutex<Inner>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next arm of `subdevice` fail with a hardware error.
    pub fn fail_arm(&self, subdevice: u32) {
        self.inner.lock().fail_arm.insert(subdevice);
    }

    /// Keep `subdevice` from producing data after start, as if its external
    /// trigger never fired.
    pub fn hold_production(&self, subdevice: u32) {
        self.inner.lock().held.insert(subdevice);
    }

    /// Number of currently armed subdevices.
    pub fn armed_count(&self) -> usize {
        self.inner.lock().armed.len()
    }

    /// Whether interrupt generation is enabled on a line.
    pub fn irq_enabled(&self, subdevice: u32, channel: u32) -> bool {
        self.inner.lock().irq_lines.contains(&(subdevice, channel))
    }

    /// Inject one interrupt event, as the hardware would on a qualifying
    /// edge.
    pub fn pulse_irq(&self, subdevice: u32, channel: u32, value: u32, status: u32) {
        let hooks = self.inner.lock().hooks.clone();
        if let Some(hooks) = hooks {
            hooks.post_irq(subdevice, channel, value, status);
        }
    }

    fn stop_worker(&self, subdevice: u32) -> Option<JoinHandle<()>> {
        let mut inner = self.inner.lock();
        if let Some(stop) = inner.stops.remove(&subdevice) {
            stop.store(true, Ordering::Relaxed);
        }
        inner.workers.remove(&subdevice)
    }
}

impl HardwareBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn attach(&self, hooks: EngineHooks) {
        self.inner.lock().hooks = Some(hooks);
    }

    fn configure_stream(&self, subdevice: u32, setup: &StreamSetup) -> Result<()> {
        self.inner.lock().setups.insert(subdevice, setup.clone());
        Ok(())
    }

    fn arm(&self, subdevice: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_arm.remove(&subdevice) {
            return Err(MeError::hardware(format!(
                "simulated arm failure on subdevice {subdevice}"
            )));
        }
        inner.armed.insert(subdevice);
        Ok(())
    }

    fn disarm(&self, subdevice: u32) -> Result<()> {
        self.inner.lock().armed.remove(&subdevice);
        Ok(())
    }

    fn release_trigger(&self, subdevices: &[u32]) -> Result<()> {
        let mut inner = self.inner.lock();
        let hooks = inner.hooks.clone().ok_or_else(|| {
            MeError::hardware("trigger release before backend attach")
        })?;
        for &subdevice in subdevices {
            if !inner.armed.contains(&subdevice) {
                return Err(MeError::hardware(format!(
                    "subdevice {subdevice} is not armed"
                )));
            }
            let Some(setup) = inner.setups.get(&subdevice).cloned() else {
                return Err(MeError::hardware(format!(
                    "subdevice {subdevice} has no stream setup"
                )));
            };
            let stop = Arc::new(AtomicBool::new(false));
            inner.stops.insert(subdevice, Arc::clone(&stop));
            let held = inner.held.contains(&subdevice);
            let direction = hooks.stream_direction(subdevice);
            let worker_hooks = hooks.clone();
            let handle = thread::Builder::new()
                .name(format!("me-mock-sub{subdevice}"))
                .spawn(move || match direction {
                    Some(StreamDirection::Input) => {
                        run_input(&worker_hooks, subdevice, &setup, &stop, held)
                    }
                    Some(StreamDirection::Output) => {
                        run_output(&worker_hooks, subdevice, &setup, &stop)
                    }
                    None => {}
                })
                .map_err(|e| MeError::hardware(format!("spawning data path: {e}")))?;
            inner.workers.insert(subdevice, handle);
            debug!(subdevice, "mock trigger released");
        }
        Ok(())
    }

    fn cancel(&self, subdevice: u32) -> Result<()> {
        let handle = self.stop_worker(subdevice);
        self.inner.lock().armed.remove(&subdevice);
        if let Some(handle) = handle {
            // Synchronous quiesce: no fill or drain happens after cancel
            // returns.
            let _ = handle.join();
        }
        Ok(())
    }

    fn irq_enable(
        &self,
        subdevice: u32,
        channel: u32,
        _source: IrqSource,
        _edge: TriggerEdge,
        _flags: IrqFlags,
    ) -> Result<()> {
        self.inner.lock().irq_lines.insert((subdevice, channel));
        Ok(())
    }

    fn irq_disable(&self, subdevice: u32, channel: u32) -> Result<()> {
        self.inner.lock().irq_lines.remove(&(subdevice, channel));
        Ok(())
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut inner = self.inner.lock();
            for stop in inner.stops.values() {
                stop.store(true, Ordering::Relaxed);
            }
            inner.workers.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
    }
}

fn run_input(
    hooks: &EngineHooks,
    subdevice: u32,
    setup: &StreamSetup,
    stop: &AtomicBool,
    held: bool,
) {
    let channels = setup.channels.len() as u32;
    let scan_limit = setup.trigger.stop_scan_count();
    let mut rng = rand::thread_rng();
    let mut scan_index: u64 = 0;
    loop {
        if stop.load(Ordering::Relaxed) || !hooks.is_running(subdevice) {
            return;
        }
        if held {
            // External trigger never fires; stay Running without data.
            thread::sleep(SCAN_PERIOD);
            continue;
        }
        if let Some(limit) = scan_limit {
            if scan_index >= limit {
                hooks.stream_complete(subdevice);
                return;
            }
        }
        let scan: Vec<Sample> = (0..channels)
            .map(|channel| {
                let ramp = (scan_index as u32).wrapping_mul(16).wrapping_add(channel * 4);
                ramp.wrapping_add(rng.gen_range(0..4))
            })
            .collect();
        if !hooks.fill_stream(subdevice, &scan) {
            return;
        }
        scan_index += 1;
        thread::sleep(SCAN_PERIOD);
    }
}

fn run_output(hooks: &EngineHooks, subdevice: u32, setup: &StreamSetup, stop: &AtomicBool) {
    let wraparound = setup.flags.contains(ConfigFlags::WRAPAROUND);
    loop {
        if stop.load(Ordering::Relaxed) || !hooks.is_running(subdevice) {
            return;
        }
        let drained = hooks.drain_stream(subdevice, 64);
        if drained.is_empty() && !wraparound {
            // Buffer ran dry: single-shot output is complete.
            hooks.stream_complete(subdevice);
            return;
        }
        thread::sleep(SCAN_PERIOD);
    }
}
