//! Synchronization primitives
//!
//! The pipeline never uses a platform mutex to guard its stage buffers.
//! Every shared buffer sits behind a [`FilterLock`], which implements
//! mutual exclusion for a fixed set of worker indices using only atomic
//! loads, stores and cooperative yielding.

pub mod filter_lock;

pub use filter_lock::{FilterLock, FilterLockGuard};

#[cfg(test)]
mod filter_lock_test;
