use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};

/// A value read from a [`LatestSlot`], tagged with its write sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Latest<T> {
    pub seq: u64,
    pub value: T,
}

/// Single-slot overwrite cell shared between one producer and the control tick.
///
/// Writers always win; readers never wait. Each write lands in `primary` and
/// then in `shadow`, one lock at a time, so with a single producer at least one
/// cell is free. A read that races a write gets the value from the free cell,
/// which is at worst the previous write.
#[derive(Debug, Default)]
pub struct LatestSlot<T> {
    primary: Mutex<Option<Latest<T>>>,
    shadow: Mutex<Option<Latest<T>>>,
    writes: AtomicU64,
}

fn lock<T>(cell: &Mutex<T>) -> MutexGuard<'_, T> {
    cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn try_read<T: Copy>(cell: &Mutex<Option<T>>) -> Result<Option<T>, ()> {
    match cell.try_lock() {
        Ok(guard) => Ok(*guard),
        Err(TryLockError::Poisoned(poisoned)) => Ok(*poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => Err(()),
    }
}

impl<T: Copy> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            primary: Mutex::new(None),
            shadow: Mutex::new(None),
            writes: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, value: T) {
        let seq = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        let latest = Some(Latest { seq, value });
        *lock(&self.primary) = latest;
        *lock(&self.shadow) = latest;
    }

    /// Non-blocking read of the most recent value. Does not clear the slot.
    pub fn latest(&self) -> Option<Latest<T>> {
        try_read(&self.primary)
            .or_else(|()| try_read(&self.shadow))
            .unwrap_or(None)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}
