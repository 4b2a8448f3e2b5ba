//! Interrupt event dispatcher.
//!
//! The hardware-interrupt path never runs user code: the backend only hands
//! `(subdevice, channel, value, status)` to a dispatcher thread over a
//! channel. That thread advances the per-line event counter, wakes every
//! blocked [`wait`](IrqDispatcher::wait) caller, and then invokes the
//! registered callbacks one after another in registration order. Callbacks
//! for one event never run concurrently with each other; waiters and
//! callbacks may observe the same event in either order.
//!
//! Callback registrations are addressed by an opaque [`CallbackToken`]
//! issued at registration time; removal matches the token, and removing an
//! unknown token is a no-op success.

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, trace};

use crate::error::{MeError, Result};

/// Interrupt source selection for [`IrqDispatcher::wait`]-able lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IrqSource {
    /// Device-default interrupt condition
    #[default]
    Default,
    /// Edge on a single digital line
    Line,
    /// Match of a digital input pattern
    Pattern,
    /// Any change under a digital input mask
    Mask,
    /// Over-temperature alarm
    OverTemperature,
}

/// One delivered interrupt event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqEvent {
    /// Monotonic event count for this (subdevice, channel) line
    pub count: u64,
    /// Value captured by the hardware at the interrupt
    pub value: u32,
    /// Device status word captured at the interrupt
    pub status: u32,
}

/// Arguments passed to a registered interrupt callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqCallbackArgs {
    pub subdevice: u32,
    pub channel: u32,
    pub count: u64,
    pub value: u32,
    pub status: u32,
}

/// Interrupt callback. Context travels inside the closure's captures.
pub type IrqCallback = Arc<dyn Fn(&IrqCallbackArgs) + Send + Sync>;

/// Opaque identity of one callback registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackToken {
    subdevice: u32,
    channel: u32,
    id: u64,
}

/// Raw notification captured on the interrupt-equivalent path.
#[derive(Debug, Clone, Copy)]
pub struct IrqNotice {
    pub subdevice: u32,
    pub channel: u32,
    pub value: u32,
    pub status: u32,
}

pub(crate) enum DispatchMsg {
    Event(IrqNotice),
    Shutdown,
}

struct CallbackEntry {
    id: u64,
    callback: IrqCallback,
}

#[derive(Default)]
struct LineState {
    armed: bool,
    /// Pass the raw device status word through instead of reducing it to a
    /// set/clear indication
    extended: bool,
    count: u64,
    value: u32,
    status: u32,
    /// Bumped by irq stop or stream stop; wakes and aborts waiters
    abort_seq: u64,
    callbacks: Vec<CallbackEntry>,
    next_id: u64,
}

/// One (subdevice, channel) interrupt line.
struct IrqLine {
    state: Mutex<LineState>,
    cv: Condvar,
}

impl IrqLine {
    fn new() -> Self {
        Self {
            state: Mutex::new(LineState::default()),
            cv: Condvar::new(),
        }
    }
}

type LineTable = RwLock<HashMap<(u32, u32), Arc<IrqLine>>>;

/// Ordered callback registry and blocking wait primitive, fed by a
/// dedicated dispatcher thread.
pub struct IrqDispatcher {
    lines: Arc<LineTable>,
    tx: Mutex<mpsc::Sender<DispatchMsg>>,
    worker: Option<JoinHandle<()>>,
}

impl IrqDispatcher {
    pub(crate) fn new() -> Self {
        let lines: Arc<LineTable> = Arc::new(RwLock::new(HashMap::new()));
        let (tx, rx) = mpsc::channel();
        let thread_lines = Arc::clone(&lines);
        let worker = thread::Builder::new()
            .name("me-irq-dispatch".into())
            .spawn(move || dispatch_loop(&thread_lines, &rx))
            .ok();
        Self {
            lines,
            tx: Mutex::new(tx),
            worker,
        }
    }

    /// Sender handle for the hardware path.
    pub(crate) fn sender(&self) -> mpsc::Sender<DispatchMsg> {
        self.tx.lock().clone()
    }

    fn line(&self, subdevice: u32, channel: u32) -> Arc<IrqLine> {
        if let Some(line) = self.lines.read().get(&(subdevice, channel)) {
            return Arc::clone(line);
        }
        let mut lines = self.lines.write();
        Arc::clone(
            lines
                .entry((subdevice, channel))
                .or_insert_with(|| Arc::new(IrqLine::new())),
        )
    }

    /// Arm a line. Fails with `AlreadyRunning` if it is armed. `extended`
    /// selects whether events carry the raw device status word or a reduced
    /// set/clear indication.
    pub(crate) fn arm(&self, subdevice: u32, channel: u32, extended: bool) -> Result<()> {
        let line = self.line(subdevice, channel);
        let mut state = line.state.lock();
        if state.armed {
            return Err(MeError::AlreadyRunning { subdevice });
        }
        state.armed = true;
        state.extended = extended;
        debug!(subdevice, channel, extended, "irq line armed");
        Ok(())
    }

    /// Disarm a line, waking and aborting blocked waiters.
    pub(crate) fn disarm(&self, subdevice: u32, channel: u32) -> Result<()> {
        let line = self.line(subdevice, channel);
        let mut state = line.state.lock();
        if !state.armed {
            return Err(MeError::NotRunning { subdevice });
        }
        state.armed = false;
        state.abort_seq += 1;
        line.cv.notify_all();
        debug!(subdevice, channel, "irq line disarmed");
        Ok(())
    }

    /// Whether a line is currently armed.
    pub(crate) fn is_armed(&self, subdevice: u32, channel: u32) -> bool {
        self.line(subdevice, channel).state.lock().armed
    }

    /// Append a callback; it is invoked for every event after every earlier
    /// registration, in order.
    pub(crate) fn add_callback(
        &self,
        subdevice: u32,
        channel: u32,
        callback: IrqCallback,
    ) -> CallbackToken {
        let line = self.line(subdevice, channel);
        let mut state = line.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.callbacks.push(CallbackEntry { id, callback });
        trace!(subdevice, channel, id, "irq callback registered");
        CallbackToken {
            subdevice,
            channel,
            id,
        }
    }

    /// Remove the registration identified by `token`. Unknown tokens are a
    /// no-op success.
    pub(crate) fn remove_callback(&self, token: CallbackToken) {
        let line = self.line(token.subdevice, token.channel);
        let mut state = line.state.lock();
        if let Some(pos) = state.callbacks.iter().position(|e| e.id == token.id) {
            state.callbacks.remove(pos);
            trace!(
                subdevice = token.subdevice,
                channel = token.channel,
                id = token.id,
                "irq callback removed"
            );
        }
    }

    /// Number of registered callbacks on a line.
    pub(crate) fn callback_count(&self, subdevice: u32, channel: u32) -> usize {
        self.line(subdevice, channel).state.lock().callbacks.len()
    }

    /// Block until the event counter advances past the value observed at
    /// call entry, then return the new event.
    pub(crate) fn wait(
        &self,
        subdevice: u32,
        channel: u32,
        deadline: Option<Instant>,
    ) -> Result<IrqEvent> {
        let line = self.line(subdevice, channel);
        let mut state = line.state.lock();
        if !state.armed {
            return Err(MeError::NotRunning { subdevice });
        }
        let entry_count = state.count;
        let entry_abort = state.abort_seq;
        loop {
            if state.count > entry_count {
                return Ok(IrqEvent {
                    count: state.count,
                    value: state.value,
                    status: state.status,
                });
            }
            if state.abort_seq != entry_abort || !state.armed {
                return Err(MeError::Aborted { subdevice });
            }
            match deadline {
                Some(at) => {
                    if line.cv.wait_until(&mut state, at).timed_out() {
                        return Err(MeError::Timeout);
                    }
                }
                None => line.cv.wait(&mut state),
            }
        }
    }

    /// Abort every blocked waiter on all lines of a subdevice; used by the
    /// stream stop path.
    pub(crate) fn cancel_subdevice(&self, subdevice: u32) {
        let lines = self.lines.read();
        for ((sub, _), line) in lines.iter() {
            if *sub != subdevice {
                continue;
            }
            let mut state = line.state.lock();
            state.abort_seq += 1;
            line.cv.notify_all();
        }
    }
}

impl Drop for IrqDispatcher {
    fn drop(&mut self) {
        let _ = self.tx.lock().send(DispatchMsg::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn dispatch_loop(lines: &LineTable, rx: &mpsc::Receiver<DispatchMsg>) {
    while let Ok(msg) = rx.recv() {
        let notice = match msg {
            DispatchMsg::Shutdown => break,
            DispatchMsg::Event(notice) => notice,
        };
        dispatch_one(lines, notice);
    }
    debug!("irq dispatcher thread exiting");
}

fn dispatch_one(lines: &LineTable, notice: IrqNotice) {
    let line = match lines.read().get(&(notice.subdevice, notice.channel)) {
        Some(line) => Arc::clone(line),
        None => {
            trace!(?notice, "irq event for unknown line dropped");
            return;
        }
    };

    let mut state = line.state.lock();
    if !state.armed {
        trace!(?notice, "irq event while disarmed dropped");
        return;
    }
    state.count += 1;
    state.value = notice.value;
    state.status = if state.extended {
        notice.status
    } else {
        u32::from(notice.status != 0)
    };
    let args = IrqCallbackArgs {
        subdevice: notice.subdevice,
        channel: notice.channel,
        count: state.count,
        value: state.value,
        status: state.status,
    };
    let snapshot: Vec<IrqCallback> = state
        .callbacks
        .iter()
        .map(|e| Arc::clone(&e.callback))
        .collect();
    line.cv.notify_all();
    drop(state);

    // Callbacks run outside the line lock, strictly in registration order,
    // one at a time.
    for callback in snapshot {
        callback(&args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn post(dispatcher: &IrqDispatcher, subdevice: u32, channel: u32, value: u32) {
        dispatcher
            .sender()
            .send(DispatchMsg::Event(IrqNotice {
                subdevice,
                channel,
                value,
                status: 0,
            }))
            .unwrap();
    }

    #[test]
    fn test_arm_twice_fails() {
        let dispatcher = IrqDispatcher::new();
        dispatcher.arm(0, 0, false).unwrap();
        assert!(matches!(
            dispatcher.arm(0, 0, false),
            Err(MeError::AlreadyRunning { .. })
        ));
        dispatcher.disarm(0, 0).unwrap();
        dispatcher.arm(0, 0, false).unwrap();
    }

    #[test]
    fn test_disarm_requires_armed() {
        let dispatcher = IrqDispatcher::new();
        assert!(matches!(
            dispatcher.disarm(0, 0),
            Err(MeError::NotRunning { .. })
        ));
    }

    #[test]
    fn test_wait_receives_event() {
        let dispatcher = Arc::new(IrqDispatcher::new());
        dispatcher.arm(1, 0, false).unwrap();

        let poster = Arc::clone(&dispatcher);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            post(&poster, 1, 0, 0xbeef);
        });

        let event = dispatcher
            .wait(1, 0, Some(Instant::now() + Duration::from_secs(2)))
            .unwrap();
        assert_eq!(event.count, 1);
        assert_eq!(event.value, 0xbeef);
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_timeout() {
        let dispatcher = IrqDispatcher::new();
        dispatcher.arm(0, 0, false).unwrap();
        let err = dispatcher
            .wait(0, 0, Some(Instant::now() + Duration::from_millis(20)))
            .unwrap_err();
        assert!(matches!(err, MeError::Timeout));
    }

    #[test]
    fn test_wait_unarmed_fails() {
        let dispatcher = IrqDispatcher::new();
        assert!(matches!(
            dispatcher.wait(0, 0, None),
            Err(MeError::NotRunning { .. })
        ));
    }

    #[test]
    fn test_disarm_aborts_waiter() {
        let dispatcher = Arc::new(IrqDispatcher::new());
        dispatcher.arm(2, 3, false).unwrap();

        let stopper = Arc::clone(&dispatcher);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            stopper.disarm(2, 3).unwrap();
        });

        let err = dispatcher.wait(2, 3, None).unwrap_err();
        assert!(err.is_aborted());
        handle.join().unwrap();
    }

    #[test]
    fn test_callbacks_invoked_in_registration_order() {
        let dispatcher = IrqDispatcher::new();
        dispatcher.arm(0, 0, false).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in [1u32, 2, 3] {
            let order = Arc::clone(&order);
            dispatcher.add_callback(
                0,
                0,
                Arc::new(move |args: &IrqCallbackArgs| {
                    order.lock().push((tag, args.count));
                }),
            );
        }

        post(&dispatcher, 0, 0, 42);

        // Wait for the dispatcher thread to deliver.
        let deadline = Instant::now() + Duration::from_secs(2);
        while order.lock().len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(*order.lock(), vec![(1, 1), (2, 1), (3, 1)]);
    }

    #[test]
    fn test_removed_callback_not_invoked() {
        let dispatcher = IrqDispatcher::new();
        dispatcher.arm(0, 0, false).unwrap();

        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        let token = dispatcher.add_callback(
            0,
            0,
            Arc::new(move |_: &IrqCallbackArgs| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        dispatcher.remove_callback(token);
        assert_eq!(dispatcher.callback_count(0, 0), 0);

        post(&dispatcher, 0, 0, 1);
        // Event must be counted even with no callbacks registered.
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if dispatcher.line(0, 0).state.lock().count == 1 {
                break;
            }
            assert!(Instant::now() < deadline, "event never dispatched");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_remove_unknown_token_is_noop() {
        let dispatcher = IrqDispatcher::new();
        let token = dispatcher.add_callback(0, 0, Arc::new(|_: &IrqCallbackArgs| {}));
        dispatcher.remove_callback(token);
        // Second removal of the same token has nothing to match.
        dispatcher.remove_callback(token);
        assert_eq!(dispatcher.callback_count(0, 0), 0);
    }

    #[test]
    fn test_event_while_disarmed_is_dropped() {
        let dispatcher = IrqDispatcher::new();
        dispatcher.arm(0, 0, false).unwrap();
        dispatcher.disarm(0, 0).unwrap();
        post(&dispatcher, 0, 0, 5);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(dispatcher.line(0, 0).state.lock().count, 0);
    }

    #[test]
    fn test_status_word_reduced_unless_extended() {
        let dispatcher = Arc::new(IrqDispatcher::new());
        dispatcher.arm(4, 0, false).unwrap();
        dispatcher.arm(4, 1, true).unwrap();

        let plain = Arc::clone(&dispatcher);
        let plain_wait =
            thread::spawn(move || plain.wait(4, 0, Some(Instant::now() + Duration::from_secs(2))));
        let raw = Arc::clone(&dispatcher);
        let raw_wait =
            thread::spawn(move || raw.wait(4, 1, Some(Instant::now() + Duration::from_secs(2))));
        thread::sleep(Duration::from_millis(10));
        for channel in [0, 1] {
            dispatcher
                .sender()
                .send(DispatchMsg::Event(IrqNotice {
                    subdevice: 4,
                    channel,
                    value: 1,
                    status: 0x0180,
                }))
                .unwrap();
        }

        assert_eq!(plain_wait.join().unwrap().unwrap().status, 1);
        assert_eq!(raw_wait.join().unwrap().unwrap().status, 0x0180);
    }
}
