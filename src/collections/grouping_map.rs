//! Concurrent grouping map
//!
//! A separate-chaining hash table with a bucket array that is sized once and
//! never resized. Every operation holds a single table-wide lock for its
//! whole duration, so each call is atomic with respect to every other call
//! on the same map.

use super::comparer::{IntrinsicComparer, KeyComparer};
use super::GroupingError;
use std::fmt;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Bucket count used when none is given.
pub const DEFAULT_BUCKET_COUNT: usize = 353;

struct Node<K, V> {
    key: K,
    value: V,
    next: Option<Box<Node<K, V>>>,
}

type Chain<K, V> = Option<Box<Node<K, V>>>;

struct Table<K, V> {
    buckets: Vec<Chain<K, V>>,
    len: usize,
}

impl<K, V> Table<K, V> {
    fn with_buckets(count: usize) -> Self {
        Self {
            buckets: (0..count).map(|_| None).collect(),
            len: 0,
        }
    }

    /// Append a node at the tail of chain `index`.
    fn push(&mut self, index: usize, key: K, value: V) {
        let mut cursor = &mut self.buckets[index];
        while let Some(node) = cursor {
            cursor = &mut node.next;
        }
        *cursor = Some(Box::new(Node {
            key,
            value,
            next: None,
        }));
        self.len += 1;
    }

    fn find<C>(&self, index: usize, key: &K, comparer: &C) -> Option<&V>
    where
        C: KeyComparer<K>,
    {
        let mut cursor = self.buckets[index].as_deref();
        while let Some(node) = cursor {
            if comparer.keys_equal(&node.key, key) {
                return Some(&node.value);
            }
            cursor = node.next.as_deref();
        }
        None
    }

    fn find_mut<C>(&mut self, index: usize, key: &K, comparer: &C) -> Option<&mut V>
    where
        C: KeyComparer<K>,
    {
        let mut cursor = self.buckets[index].as_deref_mut();
        while let Some(node) = cursor {
            if comparer.keys_equal(&node.key, key) {
                return Some(&mut node.value);
            }
            cursor = node.next.as_deref_mut();
        }
        None
    }
}

impl<K, V> Drop for Table<K, V> {
    fn drop(&mut self) {
        // Unlink iteratively; the default recursive drop can overflow the
        // stack on a long chain.
        for bucket in &mut self.buckets {
            let mut chain = bucket.take();
            while let Some(mut node) = chain {
                chain = node.next.take();
            }
        }
    }
}

/// Map from a key to a value, typically a `Vec` of grouped values, safe to
/// share between workers.
pub struct GroupingMap<K, V, C = IntrinsicComparer> {
    table: Mutex<Table<K, V>>,
    bucket_count: usize,
    comparer: C,
}

impl<K: Hash + Eq, V> GroupingMap<K, V> {
    /// Map with [`DEFAULT_BUCKET_COUNT`] buckets and intrinsic key equality.
    pub fn new() -> Self {
        Self::with_buckets(DEFAULT_BUCKET_COUNT)
    }

    /// Map with `bucket_count` buckets (at least one) and intrinsic key
    /// equality.
    pub fn with_buckets(bucket_count: usize) -> Self {
        Self::with_comparer(bucket_count, IntrinsicComparer::new())
    }
}

impl<K: Hash + Eq, V> Default for GroupingMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, C: KeyComparer<K>> GroupingMap<K, V, C> {
    /// Map with `bucket_count` buckets (at least one) whose hashing and
    /// equality come from `comparer`.
    pub fn with_comparer(bucket_count: usize, comparer: C) -> Self {
        let bucket_count = bucket_count.max(1);
        Self {
            table: Mutex::new(Table::with_buckets(bucket_count)),
            bucket_count,
            comparer,
        }
    }

    /// Number of hash buckets. Fixed for the lifetime of the map.
    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    pub fn comparer(&self) -> &C {
        &self.comparer
    }

    /// Number of stored entries, counting duplicates added by
    /// [`GroupingMap::insert`].
    pub fn len(&self) -> usize {
        self.lock_table().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an entry without checking whether `key` is already present.
    pub fn insert(&self, key: K, value: V) {
        let index = self.index_of(&key);
        self.lock_table().push(index, key, value);
    }

    pub fn contains(&self, key: &K) -> bool {
        let index = self.index_of(key);
        self.lock_table()
            .find(index, key, &self.comparer)
            .is_some()
    }

    /// Value stored for `key`, or `None` when absent.
    pub fn try_get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let index = self.index_of(key);
        self.lock_table()
            .find(index, key, &self.comparer)
            .cloned()
    }

    /// Value stored for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`GroupingError::KeyNotFound`] when `key` is absent.
    pub fn get(&self, key: &K) -> Result<V, GroupingError>
    where
        V: Clone,
    {
        self.try_get(key).ok_or(GroupingError::KeyNotFound)
    }

    /// Replace the value stored for `key`, inserting it when absent.
    pub fn set(&self, key: K, value: V) {
        let index = self.index_of(&key);
        let mut table = self.lock_table();
        match table.find_mut(index, &key, &self.comparer) {
            Some(existing) => *existing = value,
            None => table.push(index, key, value),
        }
    }

    /// Update the value for `key` in place with `update_existing`, or insert
    /// `make_initial()` when the key is absent. Both the lookup and the write
    /// happen under one acquisition of the table lock.
    pub fn upsert<I, U>(&self, key: K, make_initial: I, update_existing: U)
    where
        I: FnOnce() -> V,
        U: FnOnce(&mut V),
    {
        let index = self.index_of(&key);
        let mut table = self.lock_table();
        match table.find_mut(index, &key, &self.comparer) {
            Some(existing) => update_existing(existing),
            None => {
                let value = make_initial();
                table.push(index, key, value);
            }
        }
    }

    /// Removal is not supported.
    ///
    /// # Errors
    ///
    /// Always returns [`GroupingError::NotImplemented`].
    pub fn remove(&self, _key: &K) -> Result<V, GroupingError> {
        Err(GroupingError::NotImplemented {
            operation: "remove",
        })
    }

    /// Drop every entry, keeping the bucket count.
    pub fn clear(&self) {
        let fresh = Table::with_buckets(self.bucket_count);
        let old = std::mem::replace(&mut *self.lock_table(), fresh);
        drop(old);
    }

    /// Lazily walk every entry in bucket order, then chain order.
    ///
    /// The iterator holds the table lock until it is dropped; calling any
    /// other method on this map from the same thread meanwhile deadlocks.
    pub fn entries(&self) -> Entries<'_, K, V>
    where
        K: Clone,
        V: Clone,
    {
        Entries {
            table: self.lock_table(),
            next_bucket: 0,
            pending: Vec::new().into_iter(),
        }
    }

    /// Every key, in the same order as [`GroupingMap::entries`].
    pub fn keys(&self) -> impl Iterator<Item = K> + '_
    where
        K: Clone,
        V: Clone,
    {
        self.entries().map(|(key, _)| key)
    }

    /// Every value, in the same order as [`GroupingMap::entries`].
    pub fn values(&self) -> impl Iterator<Item = V> + '_
    where
        K: Clone,
        V: Clone,
    {
        self.entries().map(|(_, value)| value)
    }

    fn index_of(&self, key: &K) -> usize {
        (self.comparer.hash_key(key) % self.bucket_count as u64) as usize
    }

    fn lock_table(&self) -> MutexGuard<'_, Table<K, V>> {
        // A panicking callback can poison the lock, but never between
        // linking steps, so the chains are still well formed.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V, C> IntoIterator for GroupingMap<K, V, C> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    fn into_iter(self) -> IntoIter<K, V> {
        let mut table = self.table.into_inner().unwrap_or_else(PoisonError::into_inner);
        IntoIter {
            buckets: std::mem::take(&mut table.buckets).into_iter(),
            chain: None,
        }
    }
}

impl<K, V, C: fmt::Debug> fmt::Debug for GroupingMap<K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self
            .table
            .lock()
            .map(|table| table.len)
            .unwrap_or_else(|poisoned| poisoned.into_inner().len);
        f.debug_struct("GroupingMap")
            .field("bucket_count", &self.bucket_count)
            .field("len", &len)
            .field("comparer", &self.comparer)
            .finish()
    }
}

/// Borrowing iterator returned by [`GroupingMap::entries`].
///
/// Copies out one chain at a time, so a walk is linear in the number of
/// entries however long the chains get.
pub struct Entries<'a, K, V> {
    table: MutexGuard<'a, Table<K, V>>,
    next_bucket: usize,
    pending: std::vec::IntoIter<(K, V)>,
}

impl<K: Clone, V: Clone> Iterator for Entries<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        loop {
            if let Some(entry) = self.pending.next() {
                return Some(entry);
            }
            let chain = self.table.buckets.get(self.next_bucket)?;
            let mut snapshot = Vec::new();
            let mut node = chain.as_deref();
            while let Some(current) = node {
                snapshot.push((current.key.clone(), current.value.clone()));
                node = current.next.as_deref();
            }
            self.next_bucket += 1;
            self.pending = snapshot.into_iter();
        }
    }
}

/// Consuming iterator over a [`GroupingMap`].
pub struct IntoIter<K, V> {
    buckets: std::vec::IntoIter<Chain<K, V>>,
    chain: Chain<K, V>,
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        loop {
            if let Some(node) = self.chain.take() {
                let Node { key, value, next } = *node;
                self.chain = next;
                return Some((key, value));
            }
            self.chain = self.buckets.next()?;
        }
    }
}

impl<K, V> Drop for IntoIter<K, V> {
    fn drop(&mut self) {
        let mut chain = self.chain.take();
        while let Some(mut node) = chain {
            chain = node.next.take();
        }
        for mut chain in self.buckets.by_ref() {
            while let Some(mut node) = chain {
                chain = node.next.take();
            }
        }
    }
}
