//! Sinks for final key/value pairs
//!
//! The emit stage calls its writer from inside the filter lock's critical
//! section, so a writer never sees two pairs at once even though the emit
//! stage runs on several workers.

use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};

/// Receives each final pair of a run.
pub trait ResultWriter<K, V>: Send + Sync {
    fn write(&self, key: &K, value: &V) -> anyhow::Result<()>;
}

impl<K, V, F> ResultWriter<K, V> for F
where
    F: Fn(&K, &V) -> anyhow::Result<()> + Send + Sync,
{
    fn write(&self, key: &K, value: &V) -> anyhow::Result<()> {
        self(key, value)
    }
}

/// Default writer: one `Key: {key} | Value: {value}` line per pair on
/// stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutWriter;

impl StdoutWriter {
    /// Line written for one pair.
    pub fn format_pair<K: Display, V: Display>(key: &K, value: &V) -> String {
        format!("Key: {} | Value: {}", key, value)
    }
}

impl<K: Display, V: Display> ResultWriter<K, V> for StdoutWriter {
    fn write(&self, key: &K, value: &V) -> anyhow::Result<()> {
        use std::io::Write;

        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", Self::format_pair(key, value))?;
        Ok(())
    }
}

/// Writer that keeps every pair in memory.
///
/// Clones share the same storage, so one clone can be handed to the
/// pipeline while another is used to read the results afterwards.
#[derive(Debug)]
pub struct CollectWriter<K, V> {
    pairs: Arc<Mutex<Vec<(K, V)>>>,
}

impl<K, V> CollectWriter<K, V> {
    pub fn new() -> Self {
        Self {
            pairs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Take every pair collected so far, leaving the writer empty.
    pub fn take(&self) -> Vec<(K, V)> {
        std::mem::take(&mut *self.pairs.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.pairs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Clone for CollectWriter<K, V> {
    fn clone(&self) -> Self {
        Self {
            pairs: Arc::clone(&self.pairs),
        }
    }
}

impl<K, V> Default for CollectWriter<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ResultWriter<K, V> for CollectWriter<K, V>
where
    K: Clone + Send,
    V: Clone + Send,
{
    fn write(&self, key: &K, value: &V) -> anyhow::Result<()> {
        self.pairs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((key.clone(), value.clone()));
        Ok(())
    }
}
