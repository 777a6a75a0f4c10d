//! N-worker filter lock
//!
//! A generalization of Peterson's two-worker algorithm to a fixed number of
//! workers identified by the indices `0..workers`. A worker acquires the lock
//! by climbing `workers - 1` levels. At each level it announces itself, marks
//! itself as the most recent arrival, and waits until either another worker
//! has arrived after it or nobody else is at the same level or above. At most
//! `workers - level` workers can be past any given level, so only one worker
//! ever clears the last one.
//!
//! Waiting is pure polling. Between polls the worker yields its scheduler
//! slice (`tokio::task::yield_now` for [`FilterLock::lock`],
//! `std::thread::yield_now` for [`FilterLock::lock_blocking`]); there is no
//! OS-level blocking anywhere.
//!
//! The lock owns the value it protects, the same way `std::sync::Mutex` does,
//! and hands out a [`FilterLockGuard`] that releases on drop.

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicIsize, AtomicU64, AtomicUsize, Ordering};

/// Level value of a worker that is outside the protocol.
const IDLE: isize = -1;

/// Mutual exclusion for a fixed set of workers.
pub struct FilterLock<T: ?Sized> {
    /// Highest level each worker has announced, or [`IDLE`].
    levels: Box<[AtomicIsize]>,
    /// Most recent worker to enter each level (`workers - 1` entries).
    last_to_enter: Box<[AtomicUsize]>,
    /// Number of polls that found the entry condition unmet.
    contended_polls: AtomicU64,
    data: UnsafeCell<T>,
}

// SAFETY: `data` is only reachable through a `FilterLockGuard`, and the
// filter protocol admits at most one guard at a time. All protocol state is
// atomic with sequentially consistent ordering.
unsafe impl<T: ?Sized + Send> Send for FilterLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for FilterLock<T> {}

impl<T> FilterLock<T> {
    /// Create a lock for `workers` competitors protecting `data`.
    pub fn new(workers: usize, data: T) -> Self {
        Self {
            levels: fresh_levels(workers),
            last_to_enter: fresh_last_to_enter(workers),
            contended_polls: AtomicU64::new(0),
            data: UnsafeCell::new(data),
        }
    }

    /// Consume the lock and return the protected value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> FilterLock<T> {
    /// Number of workers this lock was sized for.
    pub fn workers(&self) -> usize {
        self.levels.len()
    }

    /// Number of entry-condition polls that had to yield since the last reset.
    pub fn contended_polls(&self) -> u64 {
        self.contended_polls.load(Ordering::Relaxed)
    }

    /// Rebuild the protocol state for a new set of `workers`.
    ///
    /// Requires exclusive access, so no worker can be inside the protocol
    /// while this runs.
    pub fn reset(&mut self, workers: usize) {
        self.levels = fresh_levels(workers);
        self.last_to_enter = fresh_last_to_enter(workers);
        *self.contended_polls.get_mut() = 0;
    }

    /// Mutable access without taking part in the protocol.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Acquire the lock for worker `id`, yielding to the async scheduler
    /// between polls.
    ///
    /// Dropping the returned future before it completes withdraws the worker
    /// from the protocol, so an aborted task never leaves peers waiting.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not below [`FilterLock::workers`].
    pub async fn lock(&self, id: usize) -> FilterLockGuard<'_, T> {
        let guard = self.begin(id);
        for level in 0..self.last_to_enter.len() {
            self.announce(id, level);
            while self.must_wait(id, level) {
                self.contended_polls.fetch_add(1, Ordering::Relaxed);
                tokio::task::yield_now().await;
            }
        }
        guard
    }

    /// Acquire the lock for worker `id` from a plain OS thread, yielding the
    /// thread between polls.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not below [`FilterLock::workers`].
    pub fn lock_blocking(&self, id: usize) -> FilterLockGuard<'_, T> {
        let guard = self.begin(id);
        for level in 0..self.last_to_enter.len() {
            self.announce(id, level);
            while self.must_wait(id, level) {
                self.contended_polls.fetch_add(1, Ordering::Relaxed);
                std::thread::yield_now();
            }
        }
        guard
    }

    /// Validate `id` and create the guard whose drop resets the worker's
    /// level, before the worker announces anything.
    fn begin(&self, id: usize) -> FilterLockGuard<'_, T> {
        assert!(
            id < self.levels.len(),
            "worker id {} out of range for a filter lock sized for {} workers",
            id,
            self.levels.len()
        );
        FilterLockGuard {
            lock: self,
            id,
            _marker: PhantomData,
        }
    }

    fn announce(&self, id: usize, level: usize) {
        self.levels[id].store(level as isize, Ordering::SeqCst);
        self.last_to_enter[level].store(id, Ordering::SeqCst);
    }

    /// Entry condition at `level`, negated: keep waiting while this worker is
    /// still the last to arrive and some other worker is at `level` or above.
    fn must_wait(&self, id: usize, level: usize) -> bool {
        if self.last_to_enter[level].load(Ordering::SeqCst) != id {
            return false;
        }
        let level = level as isize;
        self.levels
            .iter()
            .enumerate()
            .any(|(other, announced)| other != id && announced.load(Ordering::SeqCst) >= level)
    }

    fn release(&self, id: usize) {
        self.levels[id].store(IDLE, Ordering::SeqCst);
    }
}

impl<T: Default> Default for FilterLock<T> {
    /// A single-worker lock around `T::default()`.
    fn default() -> Self {
        Self::new(1, T::default())
    }
}

impl<T: ?Sized> fmt::Debug for FilterLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let levels: Vec<isize> = self
            .levels
            .iter()
            .map(|level| level.load(Ordering::SeqCst))
            .collect();
        f.debug_struct("FilterLock")
            .field("workers", &self.levels.len())
            .field("levels", &levels)
            .finish_non_exhaustive()
    }
}

/// Exclusive access to the value behind a [`FilterLock`].
///
/// Dropping the guard is the protocol's exit step for the owning worker.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct FilterLockGuard<'a, T: ?Sized> {
    lock: &'a FilterLock<T>,
    id: usize,
    _marker: PhantomData<&'a mut T>,
}

impl<T: ?Sized> FilterLockGuard<'_, T> {
    /// Worker index holding this guard.
    pub fn worker(&self) -> usize {
        self.id
    }
}

impl<T: ?Sized> Deref for FilterLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: a guard only escapes `lock`/`lock_blocking` after the
        // worker has cleared every level, which excludes all other guards.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for FilterLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `deref`.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for FilterLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release(self.id);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for FilterLockGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterLockGuard")
            .field("worker", &self.id)
            .field("data", &&**self)
            .finish()
    }
}

fn fresh_levels(workers: usize) -> Box<[AtomicIsize]> {
    (0..workers).map(|_| AtomicIsize::new(IDLE)).collect()
}

fn fresh_last_to_enter(workers: usize) -> Box<[AtomicUsize]> {
    (0..workers.saturating_sub(1))
        .map(|_| AtomicUsize::new(0))
        .collect()
}
