//! Key hashing and equality strategies
//!
//! A grouping map needs hashing and equality to agree, so both are supplied
//! together through one [`KeyComparer`].

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};

/// Hash and equality for keys of type `K`.
///
/// Implementations must keep the two consistent: keys that compare equal
/// must hash to the same value.
pub trait KeyComparer<K: ?Sized>: Send + Sync {
    /// Hash used to pick the bucket for `key`.
    fn hash_key(&self, key: &K) -> u64;

    /// Whether `left` and `right` belong to the same group.
    fn keys_equal(&self, left: &K, right: &K) -> bool;
}

/// The key type's own `Hash` and `Eq`.
#[derive(Debug, Clone, Default)]
pub struct IntrinsicComparer<S = RandomState> {
    build_hasher: S,
}

impl IntrinsicComparer {
    /// Intrinsic comparison with a randomly seeded hasher.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S> IntrinsicComparer<S> {
    /// Intrinsic comparison with a caller-chosen hasher.
    pub fn with_hasher(build_hasher: S) -> Self {
        Self { build_hasher }
    }
}

impl<K, S> KeyComparer<K> for IntrinsicComparer<S>
where
    K: Hash + Eq + ?Sized,
    S: BuildHasher + Send + Sync,
{
    fn hash_key(&self, key: &K) -> u64 {
        self.build_hasher.hash_one(key)
    }

    fn keys_equal(&self, left: &K, right: &K) -> bool {
        left == right
    }
}

/// Comparer built from a pair of functions.
///
/// ```
/// use filtermr::collections::{FnComparer, KeyComparer};
///
/// let by_length = FnComparer::new(
///     |key: &String| key.len() as u64,
///     |a: &String, b: &String| a.len() == b.len(),
/// );
/// assert!(by_length.keys_equal(&"abc".to_string(), &"xyz".to_string()));
/// ```
#[derive(Clone)]
pub struct FnComparer<H, E> {
    hash: H,
    equal: E,
}

impl<H, E> FnComparer<H, E> {
    pub fn new(hash: H, equal: E) -> Self {
        Self { hash, equal }
    }
}

impl<K, H, E> KeyComparer<K> for FnComparer<H, E>
where
    K: ?Sized,
    H: Fn(&K) -> u64 + Send + Sync,
    E: Fn(&K, &K) -> bool + Send + Sync,
{
    fn hash_key(&self, key: &K) -> u64 {
        (self.hash)(key)
    }

    fn keys_equal(&self, left: &K, right: &K) -> bool {
        (self.equal)(left, right)
    }
}

impl<H, E> std::fmt::Debug for FnComparer<H, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FnComparer(<function>, <function>)")
    }
}
