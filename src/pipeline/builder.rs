//! Progressive pipeline builder
//!
//! The reader and the mapper fix the word, key and value types, so they are
//! supplied in order through type-state builders:
//!
//! ```
//! use filtermr::pipeline::MapReduce;
//!
//! let pipeline = MapReduce::with_input::<String>()
//!     .with_reader(|text: String| Ok(text.lines().map(str::to_string).collect()))
//!     .with_mapper(|line: String| {
//!         Ok(line.split_whitespace().map(|w| (w.to_string(), 1u64)).collect())
//!     })
//!     .with_reducer(|_word, counts| Ok(counts.into_iter().sum()))
//!     .build()
//!     .expect("reducer is set");
//! # drop(pipeline);
//! ```
//!
//! The reducer is checked when [`PipelineBuilder::build`] runs, so a
//! pipeline without one never reaches `run`. The writer, the key comparer
//! and the engine default to [`StdoutWriter`], [`IntrinsicComparer`] and
//! [`Engine::FilterLock`].

use super::errors::ConfigError;
use super::orchestrator::Pipeline;
use super::writer::{ResultWriter, StdoutWriter};
use super::{Engine, MapFn, ReadFn, ReduceFn};
use crate::collections::{IntrinsicComparer, KeyComparer, DEFAULT_BUCKET_COUNT};
use std::marker::PhantomData;
use std::sync::Arc;

/// Entry point for building a pipeline.
pub struct MapReduce;

impl MapReduce {
    /// Start a pipeline that consumes inputs of type `I`.
    pub fn with_input<I>() -> InputBuilder<I> {
        InputBuilder {
            _input: PhantomData,
        }
    }
}

/// Builder step that still needs a reader.
pub struct InputBuilder<I> {
    _input: PhantomData<fn(I)>,
}

impl<I> InputBuilder<I> {
    /// Set the function that splits the input into words.
    pub fn with_reader<W, F>(self, read: F) -> ReaderBuilder<I, W>
    where
        F: Fn(I) -> anyhow::Result<Vec<W>> + Send + Sync + 'static,
    {
        ReaderBuilder {
            read: Arc::new(read),
        }
    }
}

/// Builder step that still needs a mapper.
pub struct ReaderBuilder<I, W> {
    read: ReadFn<I, W>,
}

impl<I, W> ReaderBuilder<I, W> {
    /// Set the function that turns one word into key/value pairs.
    pub fn with_mapper<K, V, F>(self, map: F) -> PipelineBuilder<I, W, K, V>
    where
        F: Fn(W) -> anyhow::Result<Vec<(K, V)>> + Send + Sync + 'static,
    {
        PipelineBuilder {
            read: self.read,
            map: Arc::new(map),
            reduce: None,
            writer: StdoutWriter,
            comparer: IntrinsicComparer::new(),
            bucket_count: DEFAULT_BUCKET_COUNT,
            engine: Engine::default(),
        }
    }
}

/// Final builder step: optional reducer, writer, comparer, table size and
/// engine.
pub struct PipelineBuilder<I, W, K, V, C = IntrinsicComparer, Wr = StdoutWriter> {
    read: ReadFn<I, W>,
    map: MapFn<W, K, V>,
    reduce: Option<ReduceFn<K, V>>,
    writer: Wr,
    comparer: C,
    bucket_count: usize,
    engine: Engine,
}

impl<I, W, K, V, C, Wr> PipelineBuilder<I, W, K, V, C, Wr> {
    /// Set the function that folds a key's grouped values into one value.
    pub fn with_reducer<F>(mut self, reduce: F) -> Self
    where
        F: Fn(&K, Vec<V>) -> anyhow::Result<V> + Send + Sync + 'static,
    {
        self.reduce = Some(Arc::new(reduce));
        self
    }

    /// Replace the default stdout writer.
    pub fn with_writer<Wr2>(self, writer: Wr2) -> PipelineBuilder<I, W, K, V, C, Wr2>
    where
        Wr2: ResultWriter<K, V>,
    {
        PipelineBuilder {
            read: self.read,
            map: self.map,
            reduce: self.reduce,
            writer,
            comparer: self.comparer,
            bucket_count: self.bucket_count,
            engine: self.engine,
        }
    }

    /// Group keys with `comparer` instead of the key type's own `Hash`/`Eq`.
    pub fn with_comparer<C2>(self, comparer: C2) -> PipelineBuilder<I, W, K, V, C2, Wr>
    where
        C2: KeyComparer<K>,
    {
        PipelineBuilder {
            read: self.read,
            map: self.map,
            reduce: self.reduce,
            writer: self.writer,
            comparer,
            bucket_count: self.bucket_count,
            engine: self.engine,
        }
    }

    /// Bucket count of the grouping map used by the shuffle stage.
    pub fn with_bucket_count(mut self, bucket_count: usize) -> Self {
        self.bucket_count = bucket_count;
        self
    }

    /// Choose how stage workers serialize their commits. Defaults to
    /// [`Engine::FilterLock`].
    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    /// Validate the configuration and assemble a runnable pipeline.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingStage`] when no reducer was supplied
    /// - [`ConfigError::InvalidValue`] when the bucket count is zero
    pub fn build(self) -> Result<Pipeline<I, W, K, V, C>, ConfigError>
    where
        Wr: ResultWriter<K, V> + 'static,
        C: KeyComparer<K> + Clone,
    {
        let reduce = self
            .reduce
            .ok_or(ConfigError::MissingStage { stage: "reduce" })?;

        if self.bucket_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "bucket_count",
                value: self.bucket_count.to_string(),
                reason: "the grouping map needs at least one bucket",
            });
        }

        Ok(Pipeline::from_parts(
            self.read,
            self.map,
            reduce,
            Arc::new(self.writer),
            self.comparer,
            self.bucket_count,
            self.engine,
        ))
    }
}
