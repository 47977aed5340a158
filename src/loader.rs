//! Bulk loading of partitions into the external store.
//!
//! The orchestrator issues one [`LoadOperation`] per partition file on its
//! own `rayon` pool. That pool is sized for the store's connection budget,
//! independently of (and normally smaller than) the transform pool.
//!
//! Load failures are fatal by default ([`LoadFailurePolicy::Abort`]): the
//! first failure is returned once in-flight loads have drained. With
//! [`LoadFailurePolicy::Continue`] every partition is still attempted exactly
//! once and failures are collected in the [`LoadReport`].
//!
//! The store itself is reached through [`StoreClient`]. [`StatementLoad`]
//! renders a per-partition statement from a template, for stores that ingest
//! CSV by path:
//!
//! ```
//! use chunkline::loader::StatementLoad;
//!
//! let load = StatementLoad::new("LOAD CSV FROM '{path}' WITH HEADER AS row CREATE (:Tree {id: row.id})");
//! assert!(load.render(std::path::Path::new("/data/trees/partition_001.csv"))
//!     .starts_with("LOAD CSV FROM '/data/trees/partition_001.csv'"));
//! ```

use crate::dispatcher::MAX_WORKERS;
use crate::error::PipelineError;
use crate::metrics::PipelineMetrics;
use crate::writer::list_partitions;
use anyhow::{Context, Result};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, info_span};

/// What to do when a load operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadFailurePolicy {
    /// Stop and return the failure.
    #[default]
    Abort,
    /// Attempt every partition and report failures afterwards.
    Continue,
}

/// One load of a partition file into the store.
pub trait LoadOperation: Send + Sync {
    /// Load the partition at `partition`.
    ///
    /// # Errors
    /// Any error is a failed load; it is never retried.
    fn load(&self, partition: &Path) -> Result<()>;
}

impl<F> LoadOperation for F
where
    F: Fn(&Path) -> Result<()> + Send + Sync,
{
    fn load(&self, partition: &Path) -> Result<()> {
        self(partition)
    }
}

/// Connection to the external store.
pub trait StoreClient: Send + Sync {
    /// Execute one statement.
    ///
    /// # Errors
    /// Returns the store's error for a rejected statement.
    fn execute(&self, statement: &str) -> Result<()>;
}

/// Placeholder substituted with the partition path in statement templates.
pub const PATH_PLACEHOLDER: &str = "{path}";

/// Load operation that renders a statement per partition and runs it on a
/// [`StoreClient`], followed by any housekeeping statements.
#[derive(Clone)]
pub struct StatementLoad {
    template: String,
    after: Vec<String>,
    client: Option<Arc<dyn StoreClient>>,
}

impl StatementLoad {
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            after: Vec::new(),
            client: None,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: Arc<dyn StoreClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Run `statement` after each successful load, e.g. to release memory.
    #[must_use]
    pub fn then(mut self, statement: impl Into<String>) -> Self {
        self.after.push(statement.into());
        self
    }

    /// The statement for one partition.
    #[must_use]
    pub fn render(&self, partition: &Path) -> String {
        self.template
            .replace(PATH_PLACEHOLDER, &partition.to_string_lossy())
    }
}

impl LoadOperation for StatementLoad {
    fn load(&self, partition: &Path) -> Result<()> {
        let Some(client) = &self.client else {
            anyhow::bail!("statement load has no store client");
        };
        client.execute(&self.render(partition))?;
        for statement in &self.after {
            client
                .execute(statement)
                .with_context(|| format!("post-load statement '{statement}'"))?;
        }
        Ok(())
    }
}

/// Outcome of a bulk load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub attempted: usize,
    pub succeeded: usize,
    /// Failed partitions with their error text, ordered by path.
    pub failures: Vec<(PathBuf, String)>,
}

impl LoadReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Executes load operations with bounded concurrency.
pub struct BulkLoadOrchestrator {
    pool: ThreadPool,
    workers: usize,
    policy: LoadFailurePolicy,
    metrics: PipelineMetrics,
}

impl BulkLoadOrchestrator {
    /// Build an orchestrator with `workers` concurrent loads, clamped to
    /// `1..=MAX_WORKERS`.
    ///
    /// # Errors
    /// Returns an error if the thread pool cannot be created.
    pub fn new(workers: usize, policy: LoadFailurePolicy) -> Result<Self> {
        let workers = workers.clamp(1, MAX_WORKERS);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("chunkline-load-{i}"))
            .build()
            .context("Failed to build load worker pool")?;
        Ok(Self {
            pool,
            workers,
            policy,
            metrics: PipelineMetrics::new(),
        })
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    #[must_use]
    pub fn policy(&self) -> LoadFailurePolicy {
        self.policy
    }

    /// Load every partition found in `dir`.
    ///
    /// # Errors
    /// See [`BulkLoadOrchestrator::load_paths`].
    pub fn load_dir(&self, dir: impl AsRef<Path>, op: &dyn LoadOperation) -> Result<LoadReport> {
        let dir = dir.as_ref();
        let paths = list_partitions(dir)?;
        let _span = info_span!("bulk_load", dir = %dir.display()).entered();
        self.load_paths(paths, op)
    }

    /// Run `op` once per path and wait for all of them.
    ///
    /// # Errors
    /// Under [`LoadFailurePolicy::Abort`], returns
    /// [`PipelineError::LoadOperation`] for a failed load. Loads already in
    /// flight are allowed to finish; loads not yet started are not issued.
    pub fn load_paths(&self, paths: Vec<PathBuf>, op: &dyn LoadOperation) -> Result<LoadReport> {
        let total = paths.len();
        info!(partitions = total, workers = self.workers, "loading partitions");
        let metrics = &self.metrics;

        let run_one = |path: PathBuf| -> (PathBuf, Result<()>) {
            let outcome = op
                .load(&path)
                .with_context(|| format!("load {}", path.display()));
            match &outcome {
                Ok(()) => metrics.inc_loads_succeeded(),
                Err(e) => {
                    metrics.inc_loads_failed();
                    error!(path = %path.display(), error = %format_args!("{e:#}"), "load failed");
                }
            }
            (path, outcome)
        };

        let mut report = LoadReport::default();
        match self.policy {
            LoadFailurePolicy::Abort => {
                let outcome: Result<Vec<PathBuf>> = self.pool.install(|| {
                    paths
                        .into_par_iter()
                        .map(|p| {
                            let (path, outcome) = run_one(p);
                            outcome
                                .map(|()| path.clone())
                                .map_err(|e| {
                                    PipelineError::LoadOperation {
                                        path,
                                        message: format!("{e:#}"),
                                    }
                                    .into()
                                })
                        })
                        .collect()
                });
                let loaded = outcome?;
                report.attempted = loaded.len();
                report.succeeded = loaded.len();
            }
            LoadFailurePolicy::Continue => {
                let results: Vec<(PathBuf, Result<()>)> =
                    self.pool.install(|| paths.into_par_iter().map(run_one).collect());
                report.attempted = results.len();
                for (path, outcome) in results {
                    match outcome {
                        Ok(()) => report.succeeded += 1,
                        Err(e) => report.failures.push((path, format!("{e:#}"))),
                    }
                }
                report.failures.sort();
            }
        }
        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failures.len(),
            "bulk load finished"
        );
        Ok(report)
    }
}
