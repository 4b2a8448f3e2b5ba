//! Circular sample buffer with blocking and non-blocking stream I/O.
//!
//! One [`SampleBuffer`] sits between the application and the hardware FIFO
//! of a subdevice. For input streams the hardware path produces
//! ([`fill_from_hw`](SampleBuffer::fill_from_hw)) and the application
//! consumes; for output streams the application produces and the hardware
//! path consumes ([`drain_to_hw`](SampleBuffer::drain_to_hw)). Both cursors
//! and the monotonic produced/consumed counters live under one mutex per
//! subdevice, so configuration threads, stream I/O threads and the
//! interrupt-fill path are serialized against each other.
//!
//! Occupancy never exceeds the configured capacity:
//! `consumed <= produced <= consumed + capacity` holds at every point.
//!
//! Blocking calls park on condvars and are woken by space/data becoming
//! available, by natural stream completion, or by an explicit stop. A stop
//! surfaces [`MeError::Aborted`] to callers that made no progress instead of
//! letting them hang.

use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{trace, warn};

use crate::error::{MeError, Result};
use crate::types::Sample;

/// Snapshot of the buffer counters, as reported by stream status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCounters {
    /// Samples currently held
    pub occupancy: usize,
    /// Free space in samples
    pub space: usize,
    /// Total samples ever produced into the buffer
    pub produced: u64,
    /// Total samples ever consumed from the buffer
    pub consumed: u64,
    /// Configured capacity in samples
    pub capacity: usize,
}

struct Inner {
    buf: Vec<Sample>,
    /// Next write index
    head: usize,
    /// Next read index
    tail: usize,
    produced: u64,
    consumed: u64,
    /// Cyclic output mode: the hardware drain re-reads the preloaded block
    wraparound: bool,
    /// Cursor into the preloaded block for wraparound drains
    wrap_pos: usize,
    /// Producer finished on its own (stop condition reached)
    finished: bool,
    /// Explicit stop: blocked callers must abort
    aborted: bool,
    /// Owning subdevice, for error reporting
    subdevice: u32,
}

impl Inner {
    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn occupancy(&self) -> usize {
        debug_assert!(self.produced >= self.consumed);
        let occ = (self.produced - self.consumed) as usize;
        debug_assert!(occ <= self.capacity());
        occ
    }

    fn space(&self) -> usize {
        self.capacity() - self.occupancy()
    }

    /// Copy as many samples as fit; returns the number copied.
    fn push(&mut self, samples: &[Sample]) -> usize {
        let n = samples.len().min(self.space());
        for &s in &samples[..n] {
            let head = self.head;
            self.buf[head] = s;
            self.head = (head + 1) % self.capacity();
        }
        self.produced += n as u64;
        n
    }

    /// Pop up to `max` samples into a fresh vector.
    fn pop(&mut self, max: usize) -> Vec<Sample> {
        let n = max.min(self.occupancy());
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let tail = self.tail;
            out.push(self.buf[tail]);
            self.tail = (tail + 1) % self.capacity();
        }
        self.consumed += n as u64;
        out
    }
}

/// Fixed-capacity circular sample buffer of one subdevice.
pub struct SampleBuffer {
    inner: Mutex<Inner>,
    readable: Condvar,
    writable: Condvar,
}

impl SampleBuffer {
    /// Create an unconfigured (zero-capacity) buffer.
    pub fn new(subdevice: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: Vec::new(),
                head: 0,
                tail: 0,
                produced: 0,
                consumed: 0,
                wraparound: false,
                wrap_pos: 0,
                finished: false,
                aborted: false,
                subdevice,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    /// Size (or reuse) the buffer for a new stream configuration and reset
    /// all cursors and counters.
    pub fn reset(&self, capacity: usize, wraparound: bool) {
        let mut inner = self.inner.lock();
        if inner.buf.len() != capacity {
            inner.buf = vec![0; capacity];
        }
        inner.head = 0;
        inner.tail = 0;
        inner.produced = 0;
        inner.consumed = 0;
        inner.wraparound = wraparound;
        inner.wrap_pos = 0;
        inner.finished = false;
        inner.aborted = false;
        // Nobody can be legally blocked across a reconfigure, but wake any
        // stale waiter rather than leave it parked.
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Clear completion/abort flags at stream start, keeping preloaded data.
    pub fn arm(&self) {
        let mut inner = self.inner.lock();
        inner.finished = false;
        inner.aborted = false;
    }

    /// Mark natural end of the stream: no more hardware production or
    /// consumption. Remaining data stays readable.
    pub fn finish(&self) {
        let mut inner = self.inner.lock();
        inner.finished = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Explicit stop. `discard` drops buffered-but-unread samples; every
    /// blocked caller wakes and aborts.
    pub fn abort(&self, discard: bool) {
        let mut inner = self.inner.lock();
        inner.aborted = true;
        if discard {
            let dropped = inner.occupancy();
            if dropped > 0 {
                trace!(
                    subdevice = inner.subdevice,
                    dropped,
                    "discarding unread samples on stop"
                );
            }
            inner.tail = inner.head;
            inner.consumed = inner.produced;
        }
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Counter snapshot for status queries.
    pub fn counters(&self) -> BufferCounters {
        let inner = self.inner.lock();
        BufferCounters {
            occupancy: inner.occupancy(),
            space: inner.space(),
            produced: inner.produced,
            consumed: inner.consumed,
            capacity: inner.capacity(),
        }
    }

    /// Copy samples in without blocking; used by non-blocking writes and by
    /// preload before a synchronized start. Returns the count accepted.
    pub fn push_nonblocking(&self, samples: &[Sample]) -> usize {
        let mut inner = self.inner.lock();
        let n = inner.push(samples);
        if n > 0 {
            self.readable.notify_all();
        }
        n
    }

    /// Blocking write: suspend while the buffer is full, resuming as space
    /// is freed. Returns the count written, which is partial if the stream
    /// ends first; aborts if a stop arrives before any sample is accepted.
    pub fn push_blocking(&self, samples: &[Sample], deadline: Option<Instant>) -> Result<usize> {
        let mut inner = self.inner.lock();
        let mut written = 0;
        loop {
            written += inner.push(&samples[written..]);
            if written > 0 {
                self.readable.notify_all();
            }
            if written == samples.len() {
                return Ok(written);
            }
            if inner.aborted {
                return if written > 0 {
                    Ok(written)
                } else {
                    Err(MeError::Aborted {
                        subdevice: inner.subdevice,
                    })
                };
            }
            if inner.finished {
                // Stream left the Running state; report the partial count.
                return Ok(written);
            }
            if self.wait_writable(&mut inner, deadline) {
                return if written > 0 {
                    Ok(written)
                } else {
                    Err(MeError::Timeout)
                };
            }
        }
    }

    /// Non-blocking read: return whatever is available, possibly nothing.
    pub fn pop_nonblocking(&self, max: usize) -> Vec<Sample> {
        let mut inner = self.inner.lock();
        let out = inner.pop(max);
        if !out.is_empty() {
            self.writable.notify_all();
        }
        out
    }

    /// Blocking read: suspend until at least one sample is available, the
    /// stream ends (empty success), a stop arrives (abort), or the deadline
    /// passes (timeout).
    pub fn pop_blocking(&self, max: usize, deadline: Option<Instant>) -> Result<Vec<Sample>> {
        let mut inner = self.inner.lock();
        loop {
            if inner.occupancy() > 0 {
                let out = inner.pop(max);
                self.writable.notify_all();
                return Ok(out);
            }
            if inner.aborted {
                return Err(MeError::Aborted {
                    subdevice: inner.subdevice,
                });
            }
            if inner.finished {
                return Ok(Vec::new());
            }
            if self.wait_readable(&mut inner, deadline) {
                return Err(MeError::Timeout);
            }
        }
    }

    /// Hardware fill path for input streams. All samples must fit;
    /// otherwise the acquisition outran the consumer and the stream has
    /// overflowed.
    pub fn fill_from_hw(&self, samples: &[Sample]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.aborted || inner.finished {
            // The stream ended while the hardware path raced it; drop the
            // late samples.
            return Ok(());
        }
        if samples.len() > inner.space() {
            warn!(
                subdevice = inner.subdevice,
                incoming = samples.len(),
                space = inner.space(),
                "stream buffer overflow"
            );
            return Err(MeError::BufferOverflow {
                subdevice: inner.subdevice,
            });
        }
        let n = inner.push(samples);
        debug_assert_eq!(n, samples.len());
        self.readable.notify_all();
        Ok(())
    }

    /// Hardware drain path for output streams. In wraparound mode the
    /// preloaded block is re-read cyclically: occupancy never drops, but
    /// both transfer counters advance so status queries show progress.
    pub fn drain_to_hw(&self, max: usize) -> Vec<Sample> {
        let mut inner = self.inner.lock();
        if inner.wraparound {
            let occ = inner.occupancy();
            if occ == 0 {
                return Vec::new();
            }
            // The cyclic re-read is not bounded by occupancy; a drain
            // larger than the block wraps back to its start.
            let n = max;
            let mut out = Vec::with_capacity(n);
            let capacity = inner.capacity();
            for _ in 0..n {
                let idx = (inner.tail + inner.wrap_pos) % capacity;
                out.push(inner.buf[idx]);
                inner.wrap_pos = (inner.wrap_pos + 1) % occ;
            }
            inner.produced += n as u64;
            inner.consumed += n as u64;
            out
        } else {
            let out = inner.pop(max);
            if !out.is_empty() {
                self.writable.notify_all();
            }
            out
        }
    }

    /// Wait for the readable condvar; true on deadline expiry.
    fn wait_readable(&self, inner: &mut MutexGuard<'_, Inner>, deadline: Option<Instant>) -> bool {
        match deadline {
            Some(at) => self.readable.wait_until(inner, at).timed_out(),
            None => {
                self.readable.wait(inner);
                false
            }
        }
    }

    /// Wait for the writable condvar; true on deadline expiry.
    fn wait_writable(&self, inner: &mut MutexGuard<'_, Inner>, deadline: Option<Instant>) -> bool {
        match deadline {
            Some(at) => self.writable.wait_until(inner, at).timed_out(),
            None => {
                self.writable.wait(inner);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn buffer(capacity: usize) -> SampleBuffer {
        let buf = SampleBuffer::new(0);
        buf.reset(capacity, false);
        buf
    }

    #[test]
    fn test_push_pop_preserves_order() {
        let buf = buffer(8);
        assert_eq!(buf.push_nonblocking(&[1, 2, 3]), 3);
        assert_eq!(buf.pop_nonblocking(16), vec![1, 2, 3]);
        assert_eq!(buf.pop_nonblocking(16), Vec::<Sample>::new());
    }

    #[test]
    fn test_occupancy_never_exceeds_capacity() {
        let buf = buffer(4);
        assert_eq!(buf.push_nonblocking(&[1, 2, 3, 4, 5, 6]), 4);
        let c = buf.counters();
        assert_eq!(c.occupancy, 4);
        assert_eq!(c.produced, 4);
        assert!(c.consumed <= c.produced);
        assert!(c.produced <= c.consumed + c.capacity as u64);
    }

    #[test]
    fn test_fill_overflow_detected() {
        let buf = buffer(4);
        buf.fill_from_hw(&[1, 2, 3]).unwrap();
        let err = buf.fill_from_hw(&[4, 5]).unwrap_err();
        assert!(matches!(err, MeError::BufferOverflow { .. }));
        // The failed fill must not have corrupted the counters.
        assert_eq!(buf.counters().occupancy, 3);
    }

    #[test]
    fn test_blocking_pop_times_out_when_empty() {
        let buf = buffer(4);
        let deadline = Some(Instant::now() + Duration::from_millis(20));
        let err = buf.pop_blocking(4, deadline).unwrap_err();
        assert!(matches!(err, MeError::Timeout));
    }

    #[test]
    fn test_blocking_pop_woken_by_fill() {
        let buf = Arc::new(buffer(16));
        let producer = Arc::clone(&buf);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.fill_from_hw(&[7, 8, 9]).unwrap();
        });
        let got = buf
            .pop_blocking(16, Some(Instant::now() + Duration::from_secs(2)))
            .unwrap();
        assert_eq!(got, vec![7, 8, 9]);
        handle.join().unwrap();
    }

    #[test]
    fn test_abort_unblocks_reader() {
        let buf = Arc::new(buffer(16));
        let stopper = Arc::clone(&buf);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            stopper.abort(true);
        });
        let err = buf.pop_blocking(16, None).unwrap_err();
        assert!(err.is_aborted());
        handle.join().unwrap();
    }

    #[test]
    fn test_finish_returns_empty_success() {
        let buf = Arc::new(buffer(16));
        let finisher = Arc::clone(&buf);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            finisher.finish();
        });
        let got = buf.pop_blocking(16, None).unwrap();
        assert!(got.is_empty());
        handle.join().unwrap();
    }

    #[test]
    fn test_blocking_push_resumes_on_drain() {
        let buf = Arc::new(buffer(4));
        assert_eq!(buf.push_nonblocking(&[0, 1, 2, 3]), 4);

        let consumer = Arc::clone(&buf);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            consumer.drain_to_hw(2)
        });

        let written = buf
            .push_blocking(&[4, 5], Some(Instant::now() + Duration::from_secs(2)))
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(handle.join().unwrap(), vec![0, 1]);
        assert_eq!(buf.pop_nonblocking(8), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_blocking_push_partial_on_finish() {
        let buf = Arc::new(buffer(2));
        let finisher = Arc::clone(&buf);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            finisher.finish();
        });
        let written = buf.push_blocking(&[1, 2, 3, 4], None).unwrap();
        assert_eq!(written, 2);
        handle.join().unwrap();
    }

    #[test]
    fn test_wraparound_drain_cycles() {
        let buf = SampleBuffer::new(0);
        buf.reset(8, true);
        assert_eq!(buf.push_nonblocking(&[10, 20, 30]), 3);
        assert_eq!(buf.drain_to_hw(2), vec![10, 20]);
        assert_eq!(buf.drain_to_hw(4), vec![30, 10, 20, 30]);
        // The preloaded block is still fully buffered while the transfer
        // counters record the cyclic consumption.
        let c = buf.counters();
        assert_eq!(c.occupancy, 3);
        assert_eq!(c.consumed, 6);
    }

    #[test]
    fn test_discard_on_abort() {
        let buf = buffer(8);
        buf.push_nonblocking(&[1, 2, 3]);
        buf.abort(true);
        assert_eq!(buf.counters().occupancy, 0);
        let c = buf.counters();
        assert_eq!(c.consumed, c.produced);
    }
}
