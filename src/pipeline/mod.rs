//! Four-stage map-reduce pipeline
//!
//! A run moves through a fixed sequence of stages. Each stage partitions its
//! input round-robin across the worker pool, runs every worker to completion,
//! and only then hands its output buffer to the next stage.
//!
//! ```text
//! ┌──────┐  read  ┌─────────┐  barrier  ┌───────────┐  barrier  ┌──────────┐  barrier  ┌──────────┐
//! │ Idle │ ─────> │ Mapping │ ────────> │ Shuffling │ ────────> │ Reducing │ ────────> │ Emitting │ ──> Idle
//! └──────┘        └─────────┘           └───────────┘           └──────────┘           └──────────┘
//! ```
//!
//! Per item, a worker runs the stage's non-critical section (the user's map
//! or reduce function) without any lock, then takes the stage's
//! [`FilterLock`](crate::sync::FilterLock) for its own worker index and
//! performs one mutation of the shared buffer:
//!
//! | Stage   | Non-critical section | Critical section                      |
//! |---------|----------------------|---------------------------------------|
//! | Map     | `map(word)`          | push the batch onto the aggregation   |
//! | Shuffle | none                 | upsert each pair into the grouping map|
//! | Reduce  | `reduce(key, values)`| push the final pair onto the results  |
//! | Emit    | none                 | `write(key, value)`                   |
//!
//! [`Engine::Mutex`] swaps the filter lock for `tokio::sync::Mutex` while
//! keeping the same partitioning and barriers, which makes it a baseline to
//! compare the filter lock against.

pub mod builder;
pub mod errors;
pub mod orchestrator;
pub mod partition;
pub mod writer;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use builder::{InputBuilder, MapReduce, PipelineBuilder, ReaderBuilder};
pub use errors::{ConfigError, PipelineError};
pub use orchestrator::Pipeline;
pub use partition::round_robin;
pub use writer::{CollectWriter, ResultWriter, StdoutWriter};

/// Parses the caller's input into words.
pub type ReadFn<I, W> = Arc<dyn Fn(I) -> anyhow::Result<Vec<W>> + Send + Sync>;

/// Turns one word into its key/value pairs.
pub type MapFn<W, K, V> = Arc<dyn Fn(W) -> anyhow::Result<Vec<(K, V)>> + Send + Sync>;

/// Folds every value grouped under a key into one value.
pub type ReduceFn<K, V> = Arc<dyn Fn(&K, Vec<V>) -> anyhow::Result<V> + Send + Sync>;

/// A worker-partitioned stage of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Map,
    Shuffle,
    Reduce,
    Emit,
}

impl Stage {
    /// Every stage, in execution order.
    pub const ALL: [Stage; 4] = [Stage::Map, Stage::Shuffle, Stage::Reduce, Stage::Emit];

    /// Pipeline state while this stage runs.
    pub fn state(self) -> PipelineState {
        match self {
            Stage::Map => PipelineState::Mapping,
            Stage::Shuffle => PipelineState::Shuffling,
            Stage::Reduce => PipelineState::Reducing,
            Stage::Emit => PipelineState::Emitting,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Map => write!(f, "map"),
            Stage::Shuffle => write!(f, "shuffle"),
            Stage::Reduce => write!(f, "reduce"),
            Stage::Emit => write!(f, "emit"),
        }
    }
}

/// How a stage's workers take turns on the shared stage buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Engine {
    /// N-worker filter lock sized for the stage's worker count
    #[default]
    FilterLock,
    /// `tokio::sync::Mutex`, the runtime's own lock, as a baseline
    Mutex,
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Engine::FilterLock => write!(f, "filter-lock"),
            Engine::Mutex => write!(f, "mutex"),
        }
    }
}

/// Where a pipeline is in its run cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PipelineState {
    Idle = 0,
    Mapping = 1,
    Shuffling = 2,
    Reducing = 3,
    Emitting = 4,
}

impl PipelineState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => PipelineState::Mapping,
            2 => PipelineState::Shuffling,
            3 => PipelineState::Reducing,
            4 => PipelineState::Emitting,
            _ => PipelineState::Idle,
        }
    }
}

/// Metrics collected while one stage ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub stage: Stage,
    /// Workers launched for the stage
    pub workers: usize,
    /// Input items partitioned across the workers
    pub items_processed: usize,
    /// Critical sections executed
    pub commits: usize,
    /// Lock polls that had to yield to another worker (filter lock only)
    pub contended_polls: u64,
    /// Duration in seconds
    pub duration_secs: f64,
}

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub engine: Engine,
    pub workers: usize,
    /// Words produced by the read function
    pub words: usize,
    /// Distinct keys after grouping
    pub distinct_keys: usize,
    /// Final pairs handed to the writer
    pub results: usize,
    pub stages: Vec<StageMetrics>,
    /// Total run time in seconds
    pub duration_secs: f64,
}

impl RunSummary {
    /// Metrics for `stage`, if it ran.
    pub fn stage(&self, stage: Stage) -> Option<&StageMetrics> {
        self.stages.iter().find(|metrics| metrics.stage == stage)
    }
}
