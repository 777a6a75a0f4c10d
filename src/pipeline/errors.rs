//! Error types for building and running pipelines

use super::Stage;
use thiserror::Error;

/// Error raised while assembling a pipeline, before any run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("pipeline is missing its required {stage} function")]
    MissingStage { stage: &'static str },

    #[error("invalid pipeline configuration: {field} = {value} ({reason})")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Error raised by a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("worker count must be at least 1, got {count}")]
    InvalidWorkerCount { count: usize },

    #[error("pipeline is already running")]
    AlreadyRunning,

    #[error("read function failed")]
    Read {
        #[source]
        source: anyhow::Error,
    },

    #[error("{stage} function failed in worker {worker}")]
    Callback {
        stage: Stage,
        worker: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("worker {worker} panicked during the {stage} stage")]
    WorkerPanicked { stage: Stage, worker: usize },

    #[error("worker {worker} was cancelled during the {stage} stage")]
    WorkerCancelled { stage: Stage, worker: usize },

    #[error("{stage} stage buffer still shared after all workers joined")]
    BufferStillShared { stage: Stage },
}

impl PipelineError {
    pub(crate) fn callback(stage: Stage, worker: usize, source: anyhow::Error) -> Self {
        Self::Callback {
            stage,
            worker,
            source,
        }
    }

    pub(crate) fn from_join(stage: Stage, worker: usize, error: tokio::task::JoinError) -> Self {
        if error.is_panic() {
            Self::WorkerPanicked { stage, worker }
        } else {
            Self::WorkerCancelled { stage, worker }
        }
    }

    /// Stage the error occurred in, when it came from a worker.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Callback { stage, .. }
            | Self::WorkerPanicked { stage, .. }
            | Self::WorkerCancelled { stage, .. }
            | Self::BufferStillShared { stage } => Some(*stage),
            _ => None,
        }
    }
}
