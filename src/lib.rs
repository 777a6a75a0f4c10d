//! # filtermr
//!
//! An in-process map-reduce engine whose workers coordinate through a
//! filter lock, the N-worker generalization of Peterson's algorithm.
//!
//! ## Modules
//!
//! - `sync` - The filter lock guarding every shared buffer
//! - `collections` - Fixed-bucket grouping map with pluggable key comparison
//! - `pipeline` - Builder and four-stage orchestrator (map, shuffle, reduce, emit)
//! - `wordcount` - Ready-made word-count pipeline
//! - `app` - Configuration, logging and error reporting for the binary
pub mod app;
pub mod collections;
pub mod pipeline;
pub mod sync;
pub mod wordcount;

pub use collections::GroupingMap;
pub use pipeline::{Engine, MapReduce, Pipeline, PipelineError, RunSummary};
pub use sync::FilterLock;
