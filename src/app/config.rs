//! Application configuration
//!
//! Run settings come from three layers, later ones winning: built-in
//! defaults, an optional TOML file, then command-line flags.
//!
//! ```toml
//! workers = 8
//! buckets = 1021
//! engine = "mutex"
//! ```

use crate::collections::DEFAULT_BUCKET_COUNT;
use crate::pipeline::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error raised while loading or validating run settings
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{field} must be at least 1, got {value}")]
    OutOfRange { field: &'static str, value: usize },
}

/// Settings for one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Workers per stage
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Bucket count of the grouping map
    #[serde(default = "default_buckets")]
    pub buckets: usize,
    /// Lock used for stage buffers
    #[serde(default)]
    pub engine: Engine,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_buckets() -> usize {
    DEFAULT_BUCKET_COUNT
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            buckets: default_buckets(),
            engine: Engine::default(),
        }
    }
}

impl RunConfig {
    /// Parse settings from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, AppConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| AppConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| AppConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override the worker count when one is given.
    pub fn with_workers(mut self, workers: Option<usize>) -> Self {
        if let Some(workers) = workers {
            self.workers = workers;
        }
        self
    }

    /// Override the bucket count when one is given.
    pub fn with_buckets(mut self, buckets: Option<usize>) -> Self {
        if let Some(buckets) = buckets {
            self.buckets = buckets;
        }
        self
    }

    /// Override the engine when one is given.
    pub fn with_engine(mut self, engine: Option<Engine>) -> Self {
        if let Some(engine) = engine {
            self.engine = engine;
        }
        self
    }

    pub fn validate(&self) -> Result<(), AppConfigError> {
        if self.workers == 0 {
            return Err(AppConfigError::OutOfRange {
                field: "workers",
                value: self.workers,
            });
        }
        if self.buckets == 0 {
            return Err(AppConfigError::OutOfRange {
                field: "buckets",
                value: self.buckets,
            });
        }
        Ok(())
    }
}

/// Application configuration structure
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Verbosity level for logging
    pub verbose: u8,
    /// Settings handed to the pipeline
    pub run: RunConfig,
}

impl AppConfig {
    pub fn new(verbose: u8) -> Self {
        Self {
            verbose,
            run: RunConfig::default(),
        }
    }

    /// Replace the run settings
    pub fn with_run(mut self, run: RunConfig) -> Self {
        self.run = run;
        self
    }

    /// Get the log level string based on verbosity
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
