//! Shared/exclusive lock protecting per-subdevice control state.
//!
//! Status and data readers take shared access; configuration changes and
//! start/stop transitions take exclusive access. One [`SubdeviceLock`]
//! instance guards one subdevice, so configuration calls on a subdevice are
//! totally ordered while different subdevices proceed independently.
//!
//! Built on `parking_lot::RwLock`, which eventually blocks new readers once
//! a writer is queued, so writers are not starved by a continuous reader
//! stream.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Reader/writer guard for one subdevice's control state.
#[derive(Debug, Default)]
pub struct SubdeviceLock<T> {
    lock: RwLock<T>,
}

impl<T> SubdeviceLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            lock: RwLock::new(value),
        }
    }

    /// Shared access for status and data readers. Any number of readers may
    /// hold this concurrently while no writer is active.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.lock.read()
    }

    /// Exclusive access for configuration and state transitions. Granted
    /// only when no reader and no other writer holds the lock.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.lock.write()
    }

    /// Exclusive access without waiting; `None` if any access is active.
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        self.lock.try_write()
    }
}
