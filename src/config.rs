//! Process-level pipeline settings.
//!
//! Everything a job run depends on besides the job itself lives in one owned
//! [`PipelineConfig`] value: where job directories live, pool widths, the
//! clear-checkpoints toggle and the checkpoint/load policies. It is built in
//! code or loaded from JSON; missing JSON fields take their defaults.
//!
//! ```
//! use chunkline::config::PipelineConfig;
//!
//! let config = PipelineConfig::new("/data")
//!     .with_transform_workers(8)
//!     .with_load_workers(3)
//!     .with_clear_checkpoints(true);
//! assert!(config.validate().is_ok());
//! ```

use crate::checkpoint::CheckpointConfig;
use crate::dispatcher::MAX_WORKERS;
use crate::loader::LoadFailurePolicy;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Chunk size used when a job does not set its own.
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;
/// Load pool width used when none is configured.
pub const DEFAULT_LOAD_WORKERS: usize = 5;

fn default_data_root() -> PathBuf {
    PathBuf::from("./data")
}

fn default_transform_workers() -> usize {
    num_cpus::get().clamp(1, MAX_WORKERS)
}

fn default_load_workers() -> usize {
    DEFAULT_LOAD_WORKERS
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root holding one directory per job (and, for discovery, the inputs).
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    /// Discard existing job output and recompute.
    #[serde(default)]
    pub clear_checkpoints: bool,
    #[serde(default = "default_transform_workers")]
    pub transform_workers: usize,
    #[serde(default = "default_load_workers")]
    pub load_workers: usize,
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size: usize,
    #[serde(default = "default_true")]
    pub require_manifest: bool,
    #[serde(default = "default_true")]
    pub verify_checksums: bool,
    #[serde(default)]
    pub load_failure: LoadFailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            clear_checkpoints: false,
            transform_workers: default_transform_workers(),
            load_workers: default_load_workers(),
            default_chunk_size: default_chunk_size(),
            require_manifest: true,
            verify_checksums: true,
            load_failure: LoadFailurePolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults with the given data root.
    #[must_use]
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            ..Self::default()
        }
    }

    /// Load from a JSON file and validate.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or fails
    /// [`PipelineConfig::validate`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()
    }

    #[must_use]
    pub fn with_clear_checkpoints(mut self, clear: bool) -> Self {
        self.clear_checkpoints = clear;
        self
    }

    #[must_use]
    pub fn with_transform_workers(mut self, workers: usize) -> Self {
        self.transform_workers = workers;
        self
    }

    #[must_use]
    pub fn with_load_workers(mut self, workers: usize) -> Self {
        self.load_workers = workers;
        self
    }

    #[must_use]
    pub fn with_default_chunk_size(mut self, size: usize) -> Self {
        self.default_chunk_size = size;
        self
    }

    #[must_use]
    pub fn with_require_manifest(mut self, require: bool) -> Self {
        self.require_manifest = require;
        self
    }

    #[must_use]
    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    #[must_use]
    pub fn with_load_failure(mut self, policy: LoadFailurePolicy) -> Self {
        self.load_failure = policy;
        self
    }

    /// Check the settings, clamping worker counts above [`MAX_WORKERS`].
    ///
    /// # Errors
    /// Returns an error for a zero worker count or chunk size.
    pub fn validate(mut self) -> Result<Self> {
        if self.transform_workers == 0 {
            bail!("transform_workers must be at least 1");
        }
        if self.load_workers == 0 {
            bail!("load_workers must be at least 1");
        }
        if self.default_chunk_size == 0 {
            bail!("default_chunk_size must be at least 1");
        }
        if self.transform_workers > MAX_WORKERS {
            warn!(requested = self.transform_workers, max = MAX_WORKERS, "clamping transform workers");
            self.transform_workers = MAX_WORKERS;
        }
        if self.load_workers > MAX_WORKERS {
            warn!(requested = self.load_workers, max = MAX_WORKERS, "clamping load workers");
            self.load_workers = MAX_WORKERS;
        }
        if !self.load_pool_is_narrower() {
            warn!(
                load_workers = self.load_workers,
                transform_workers = self.transform_workers,
                "load pool is not narrower than the transform pool"
            );
        }
        Ok(self)
    }

    /// Whether the load pool is strictly smaller than the transform pool.
    ///
    /// The store accepts fewer concurrent loads than the machine can run
    /// transforms; equal widths are allowed but logged by
    /// [`PipelineConfig::validate`].
    #[must_use]
    pub fn load_pool_is_narrower(&self) -> bool {
        self.load_workers < self.transform_workers
    }

    /// The checkpoint policy slice of this config.
    #[must_use]
    pub fn checkpoint_config(&self) -> CheckpointConfig {
        CheckpointConfig {
            data_root: self.data_root.clone(),
            clear: self.clear_checkpoints,
            require_manifest: self.require_manifest,
            verify_checksums: self.verify_checksums,
        }
    }
}
