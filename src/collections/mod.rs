//! Collections shared between pipeline workers
//!
//! - `grouping_map` - fixed-size, chained hash map with a table-wide lock,
//!   used by the shuffle stage to group values by key
//! - `comparer` - hashing and equality strategies for grouping keys

pub mod comparer;
pub mod grouping_map;

pub use comparer::{FnComparer, IntrinsicComparer, KeyComparer};
pub use grouping_map::{Entries, GroupingMap, IntoIter, DEFAULT_BUCKET_COUNT};

/// Error returned by [`GroupingMap`] lookups and unsupported operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupingError {
    #[error("key not found in grouping map")]
    KeyNotFound,

    #[error("grouping map does not support {operation}")]
    NotImplemented { operation: &'static str },
}

#[cfg(test)]
mod grouping_map_test;
