//! Pipeline orchestrator
//!
//! Drives one run through the map, shuffle, reduce and emit stages. Every
//! stage follows the same protocol:
//!
//! 1. partition the stage input round-robin into one list per worker,
//! 2. move the stage's output buffer into a fresh [`FilterLock`] sized for
//!    the worker count (or a `tokio::sync::Mutex` under [`Engine::Mutex`]),
//! 3. spawn one task per worker; for each item the task runs the
//!    non-critical section, then locks with its own index and commits,
//! 4. wait for every task, then take the buffer back out of the lock.
//!    A failing worker aborts its peers, and the wait still covers them.
//!
//! Step 4 is the stage barrier: the next stage only ever receives a buffer
//! that no worker can still reach.

use super::errors::PipelineError;
use super::partition::round_robin;
use super::writer::ResultWriter;
use super::{Engine, MapFn, PipelineState, ReadFn, ReduceFn, RunSummary, Stage, StageMetrics};
use crate::collections::{GroupingMap, IntrinsicComparer, KeyComparer};
use crate::sync::FilterLock;
use futures::stream::{FuturesUnordered, StreamExt};
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn, Instrument};

/// A configured, reusable map-reduce pipeline.
///
/// Built with [`MapReduce`](super::MapReduce). Between runs it holds no
/// buffers; each run owns its aggregation, grouping and result buffers and
/// drops them when it finishes, successfully or not.
pub struct Pipeline<I, W, K, V, C = IntrinsicComparer> {
    read: ReadFn<I, W>,
    map: MapFn<W, K, V>,
    reduce: ReduceFn<K, V>,
    writer: Arc<dyn ResultWriter<K, V>>,
    comparer: C,
    bucket_count: usize,
    engine: Engine,
    state: AtomicU8,
}

impl<I, W, K, V, C> Pipeline<I, W, K, V, C> {
    pub(crate) fn from_parts(
        read: ReadFn<I, W>,
        map: MapFn<W, K, V>,
        reduce: ReduceFn<K, V>,
        writer: Arc<dyn ResultWriter<K, V>>,
        comparer: C,
        bucket_count: usize,
        engine: Engine,
    ) -> Self {
        Self {
            read,
            map,
            reduce,
            writer,
            comparer,
            bucket_count,
            engine,
            state: AtomicU8::new(PipelineState::Idle as u8),
        }
    }

    /// Current state of the run cycle.
    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Bucket count of the grouping map each run creates.
    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// Lock used for each stage's shared buffer.
    pub fn engine(&self) -> Engine {
        self.engine
    }

    fn set_state(&self, state: PipelineState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

impl<I, W, K, V, C> Pipeline<I, W, K, V, C>
where
    W: Send + 'static,
    K: Send + 'static,
    V: Send + 'static,
    C: KeyComparer<K> + Clone + 'static,
{
    /// Run `input` through every stage with exactly `workers` workers per
    /// stage.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::InvalidWorkerCount`] if `workers` is zero
    /// - [`PipelineError::AlreadyRunning`] if another run of this pipeline is
    ///   in progress
    /// - [`PipelineError::Read`] if the read function fails
    /// - [`PipelineError::Callback`] if a map, reduce or write call fails;
    ///   the failing stage's remaining workers are aborted and awaited
    /// - [`PipelineError::WorkerPanicked`] if a callback panics
    ///
    /// A failed run discards every buffer it built. Pairs already handed to
    /// the writer stay written.
    pub async fn run(&self, input: I, workers: usize) -> Result<RunSummary, PipelineError> {
        if workers == 0 {
            return Err(PipelineError::InvalidWorkerCount { count: workers });
        }
        let _active = RunGuard::enter(&self.state)?;
        let started = Instant::now();

        let words = (self.read)(input).map_err(|source| PipelineError::Read { source })?;
        let word_count = words.len();
        info!(
            "Starting run: {} words across {} workers ({})",
            word_count, workers, self.engine
        );

        let mut stages = Vec::with_capacity(Stage::ALL.len());

        self.set_state(Stage::Map.state());
        let map_work = Arc::new(MapWork {
            map: Arc::clone(&self.map),
        });
        let (aggregation, metrics) =
            run_stage(map_work, Stage::Map, self.engine, words, workers, Vec::new()).await?;
        stages.push(metrics);

        self.set_state(Stage::Shuffle.state());
        let grouping = GroupingMap::with_comparer(self.bucket_count, self.comparer.clone());
        let (grouping, metrics) = run_stage(
            Arc::new(ShuffleWork::default()),
            Stage::Shuffle,
            self.engine,
            aggregation,
            workers,
            grouping,
        )
        .await?;
        stages.push(metrics);
        let distinct_keys = grouping.len();

        self.set_state(Stage::Reduce.state());
        let reduce_work = Arc::new(ReduceWork {
            reduce: Arc::clone(&self.reduce),
        });
        let (results, metrics) = run_stage(
            reduce_work,
            Stage::Reduce,
            self.engine,
            grouping,
            workers,
            Vec::with_capacity(distinct_keys),
        )
        .await?;
        stages.push(metrics);
        let result_count = results.len();

        self.set_state(Stage::Emit.state());
        let emit_work = Arc::new(EmitWork {
            writer: Arc::clone(&self.writer),
        });
        let ((), metrics) =
            run_stage(emit_work, Stage::Emit, self.engine, results, workers, ()).await?;
        stages.push(metrics);

        let summary = RunSummary {
            engine: self.engine,
            workers,
            words: word_count,
            distinct_keys,
            results: result_count,
            stages,
            duration_secs: started.elapsed().as_secs_f64(),
        };
        info!(
            "Run completed: {} words, {} distinct keys in {:.3}s",
            summary.words, summary.distinct_keys, summary.duration_secs
        );
        Ok(summary)
    }
}

impl<I, W, K, V, C: fmt::Debug> fmt::Debug for Pipeline<I, W, K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &PipelineState::from_u8(self.state.load(Ordering::SeqCst)))
            .field("bucket_count", &self.bucket_count)
            .field("engine", &self.engine)
            .field("comparer", &self.comparer)
            .finish_non_exhaustive()
    }
}

/// Marks a pipeline as running and returns it to `Idle` when dropped,
/// whether the run finished, failed or was cancelled.
struct RunGuard<'a> {
    state: &'a AtomicU8,
}

impl<'a> RunGuard<'a> {
    fn enter(state: &'a AtomicU8) -> Result<Self, PipelineError> {
        state
            .compare_exchange(
                PipelineState::Idle as u8,
                PipelineState::Mapping as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|_| PipelineError::AlreadyRunning)?;
        Ok(Self { state })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.state.store(PipelineState::Idle as u8, Ordering::SeqCst);
    }
}

/// One stage's split between lock-free work and the guarded commit.
trait StageWork: Send + Sync + 'static {
    /// Input item handed to a worker.
    type Item: Send + 'static;
    /// Unit applied to the shared buffer in one critical section.
    type Commit: Send;
    /// Commits produced by one item's non-critical section.
    type Commits: Iterator<Item = Self::Commit> + Send;
    /// Shared buffer the stage writes to.
    type Sink: Send + 'static;

    /// Non-critical section, run without the lock.
    fn prepare(&self, item: Self::Item) -> anyhow::Result<Self::Commits>;

    /// Critical section, run while holding the lock.
    fn commit(&self, unit: Self::Commit, sink: &mut Self::Sink) -> anyhow::Result<()>;
}

struct MapWork<W, K, V> {
    map: MapFn<W, K, V>,
}

impl<W, K, V> StageWork for MapWork<W, K, V>
where
    W: Send + 'static,
    K: Send + 'static,
    V: Send + 'static,
{
    type Item = W;
    type Commit = Vec<(K, V)>;
    type Commits = std::option::IntoIter<Vec<(K, V)>>;
    type Sink = Vec<Vec<(K, V)>>;

    fn prepare(&self, word: W) -> anyhow::Result<Self::Commits> {
        let batch = (self.map)(word)?;
        Ok(Some(batch).into_iter())
    }

    fn commit(&self, batch: Vec<(K, V)>, aggregation: &mut Self::Sink) -> anyhow::Result<()> {
        aggregation.push(batch);
        Ok(())
    }
}

struct ShuffleWork<K, V, C> {
    _types: std::marker::PhantomData<fn() -> (K, V, C)>,
}

impl<K, V, C> Default for ShuffleWork<K, V, C> {
    fn default() -> Self {
        Self {
            _types: std::marker::PhantomData,
        }
    }
}

impl<K, V, C> StageWork for ShuffleWork<K, V, C>
where
    K: Send + 'static,
    V: Send + 'static,
    C: KeyComparer<K> + 'static,
{
    type Item = Vec<(K, V)>;
    type Commit = (K, V);
    type Commits = std::vec::IntoIter<(K, V)>;
    type Sink = GroupingMap<K, Vec<V>, C>;

    fn prepare(&self, batch: Vec<(K, V)>) -> anyhow::Result<Self::Commits> {
        Ok(batch.into_iter())
    }

    fn commit(&self, (key, value): (K, V), grouping: &mut Self::Sink) -> anyhow::Result<()> {
        // Exactly one of the two closures runs and takes the value.
        let value = Cell::new(Some(value));
        grouping.upsert(
            key,
            || value.take().into_iter().collect(),
            |bucket| bucket.extend(value.take()),
        );
        Ok(())
    }
}

struct ReduceWork<K, V> {
    reduce: ReduceFn<K, V>,
}

impl<K, V> StageWork for ReduceWork<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
    type Item = (K, Vec<V>);
    type Commit = (K, V);
    type Commits = std::option::IntoIter<(K, V)>;
    type Sink = Vec<(K, V)>;

    fn prepare(&self, (key, values): (K, Vec<V>)) -> anyhow::Result<Self::Commits> {
        let value = (self.reduce)(&key, values)?;
        Ok(Some((key, value)).into_iter())
    }

    fn commit(&self, pair: (K, V), results: &mut Self::Sink) -> anyhow::Result<()> {
        results.push(pair);
        Ok(())
    }
}

struct EmitWork<K, V> {
    writer: Arc<dyn ResultWriter<K, V>>,
}

impl<K, V> StageWork for EmitWork<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
    type Item = (K, V);
    type Commit = (K, V);
    type Commits = std::option::IntoIter<(K, V)>;
    type Sink = ();

    fn prepare(&self, pair: (K, V)) -> anyhow::Result<Self::Commits> {
        Ok(Some(pair).into_iter())
    }

    fn commit(&self, (key, value): (K, V), _: &mut ()) -> anyhow::Result<()> {
        self.writer.write(&key, &value)
    }
}

/// A stage buffer behind the lock chosen by the pipeline's [`Engine`].
enum StageBuffer<T> {
    Filter(FilterLock<T>),
    Mutex(tokio::sync::Mutex<T>),
}

impl<T: Send> StageBuffer<T> {
    fn new(engine: Engine, workers: usize, sink: T) -> Self {
        match engine {
            Engine::FilterLock => StageBuffer::Filter(FilterLock::new(workers, sink)),
            Engine::Mutex => StageBuffer::Mutex(tokio::sync::Mutex::new(sink)),
        }
    }

    /// Run `critical` on the buffer while holding the lock as `worker`.
    async fn with_locked<R, F>(&self, worker: usize, critical: F) -> R
    where
        F: FnOnce(&mut T) -> R + Send,
    {
        match self {
            StageBuffer::Filter(lock) => critical(&mut *lock.lock(worker).await),
            StageBuffer::Mutex(lock) => critical(&mut *lock.lock().await),
        }
    }

    fn contended_polls(&self) -> u64 {
        match self {
            StageBuffer::Filter(lock) => lock.contended_polls(),
            StageBuffer::Mutex(_) => 0,
        }
    }

    fn into_inner(self) -> T {
        match self {
            StageBuffer::Filter(lock) => lock.into_inner(),
            StageBuffer::Mutex(lock) => lock.into_inner(),
        }
    }
}

/// Run one stage to its barrier and hand back the filled buffer.
///
/// The barrier holds on failure too: after the first error the other
/// workers are aborted, and the stage still waits for every task to stop
/// before returning, so no callback of a failed run outlives `run`.
async fn run_stage<S: StageWork>(
    work: Arc<S>,
    stage: Stage,
    engine: Engine,
    items: impl IntoIterator<Item = S::Item>,
    workers: usize,
    sink: S::Sink,
) -> Result<(S::Sink, StageMetrics), PipelineError> {
    let span = tracing::debug_span!("stage", %stage, %engine, workers);
    async move {
        let started = Instant::now();
        let partitions = round_robin(items, workers);
        let items_processed: usize = partitions.iter().map(Vec::len).sum();
        debug!("Starting {} stage with {} items", stage, items_processed);

        let buffer = Arc::new(StageBuffer::new(engine, workers, sink));
        let handles: Vec<_> = partitions
            .into_iter()
            .enumerate()
            .map(|(worker, partition)| {
                let work = Arc::clone(&work);
                let buffer = Arc::clone(&buffer);
                tokio::spawn(
                    drain_partition(work, buffer, stage, worker, partition).in_current_span(),
                )
            })
            .collect();
        let abort_handles: Vec<_> = handles.iter().map(|handle| handle.abort_handle()).collect();

        let mut pending: FuturesUnordered<_> = handles
            .into_iter()
            .enumerate()
            .map(|(worker, handle)| async move { (worker, handle.await) })
            .collect();

        let mut commits = 0usize;
        let mut failure = None;
        while let Some((worker, joined)) = pending.next().await {
            let outcome = joined
                .unwrap_or_else(|error| Err(PipelineError::from_join(stage, worker, error)));
            match outcome {
                Ok(worker_commits) => commits += worker_commits,
                Err(error) if failure.is_none() => {
                    warn!("{} stage failed: {}", stage, error);
                    for handle in &abort_handles {
                        handle.abort();
                    }
                    failure = Some(error);
                }
                Err(error) => {
                    trace!("Worker {} stopped after the stage failed: {}", worker, error);
                }
            }
        }
        if let Some(error) = failure {
            return Err(error);
        }

        let buffer =
            Arc::try_unwrap(buffer).map_err(|_| PipelineError::BufferStillShared { stage })?;
        let contended_polls = buffer.contended_polls();
        let metrics = StageMetrics {
            stage,
            workers,
            items_processed,
            commits,
            contended_polls,
            duration_secs: started.elapsed().as_secs_f64(),
        };
        debug!(
            "Finished {} stage: {} commits, {} contended polls in {:.3}s",
            stage, commits, contended_polls, metrics.duration_secs
        );
        Ok((buffer.into_inner(), metrics))
    }
    .instrument(span)
    .await
}

/// Worker body: process one partition in order, committing each result
/// while holding the stage lock.
async fn drain_partition<S: StageWork>(
    work: Arc<S>,
    buffer: Arc<StageBuffer<S::Sink>>,
    stage: Stage,
    worker: usize,
    partition: Vec<S::Item>,
) -> Result<usize, PipelineError> {
    let assigned = partition.len();
    let mut commits = 0;
    for item in partition {
        let units = work
            .prepare(item)
            .map_err(|source| PipelineError::callback(stage, worker, source))?;
        for unit in units {
            buffer
                .with_locked(worker, |sink| work.commit(unit, sink))
                .await
                .map_err(|source| PipelineError::callback(stage, worker, source))?;
            commits += 1;
        }
    }
    trace!(
        "Worker {} finished {} items with {} commits",
        worker,
        assigned,
        commits
    );
    Ok(commits)
}
