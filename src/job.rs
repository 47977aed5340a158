//! Jobs and the runner that executes them.
//!
//! A [`Job`] is the immutable description of one pipeline run: name (which
//! is also its output directory under the data root), declared output
//! header, transform, chunk size, "expand" flag and an optional worker
//! override. [`JobRunner`] executes jobs against one [`PipelineConfig`]:
//!
//! 1. the checkpoint manager decides skip vs. compute (clearing leftovers);
//! 2. the source is chunked, chunks are grouped into rounds of pool width,
//!    and each round is transformed on the persistent worker pool;
//! 3. after each round the control thread writes one partition per chunk;
//! 4. once all partitions exist the completion manifest is written.
//!
//! The runner keeps both worker pools alive across jobs. Loading is a
//! separate step ([`JobRunner::load`]) or combined with a run through
//! [`JobRunner::run_and_load`].
//!
//! ```no_run
//! use chunkline::prelude::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let runner = JobRunner::new(PipelineConfig::new("/data"))?;
//! let job = Job::builder("trees", Header::new(["id", "geometry"]))
//!     .spec(TransformSpec::Identity)
//!     .chunk_size(1_000)
//!     .build()?;
//! let outcome = runner.run_discovered(&job)?;
//! println!("{}", outcome.dir().display());
//! # Ok(())
//! # }
//! ```

use crate::checkpoint::{CheckpointDecision, CheckpointManager, JobManifest, read_manifest};
use crate::chunker::{IteratorChunkExt, rounds};
use crate::config::PipelineConfig;
use crate::dispatcher::{DispatchSummary, WorkerObserver, WorkerPoolDispatcher};
use crate::error::PipelineError;
use crate::loader::{BulkLoadOrchestrator, LoadOperation, LoadReport};
use crate::metrics::PipelineMetrics;
use crate::record::{Header, Record};
use crate::source::{CsvSource, RecordSource, discover_source};
use crate::transform::{RecordTransform, TransformRegistry, TransformSpec};
use crate::writer::{PartitionInfo, PartitionedWriter};
use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span};

/// Immutable description of one pipeline run.
#[derive(Clone)]
pub struct Job {
    name: String,
    header: Header,
    transform: Arc<dyn RecordTransform>,
    chunk_size: Option<usize>,
    expand: bool,
    workers: Option<usize>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("header", &self.header.names())
            .field("chunk_size", &self.chunk_size)
            .field("expand", &self.expand)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl Job {
    /// Start describing a job called `name` whose partitions carry `header`.
    pub fn builder(name: impl Into<String>, header: Header) -> JobBuilder {
        JobBuilder {
            name: name.into(),
            header,
            transform: TransformChoice::Spec(TransformSpec::Identity),
            chunk_size: None,
            expand: false,
            workers: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[must_use]
    pub fn transform(&self) -> &dyn RecordTransform {
        self.transform.as_ref()
    }

    /// Chunk size set on the job, if any; the runner falls back to the
    /// config default.
    #[must_use]
    pub fn chunk_size(&self) -> Option<usize> {
        self.chunk_size
    }

    #[must_use]
    pub fn expand(&self) -> bool {
        self.expand
    }

    /// Transform pool width set on the job, if any.
    #[must_use]
    pub fn workers(&self) -> Option<usize> {
        self.workers
    }
}

enum TransformChoice {
    Spec(TransformSpec),
    Direct(Arc<dyn RecordTransform>),
}

/// Builder for [`Job`].
pub struct JobBuilder {
    name: String,
    header: Header,
    transform: TransformChoice,
    chunk_size: Option<usize>,
    expand: bool,
    workers: Option<usize>,
}

impl JobBuilder {
    #[must_use]
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    /// Allow one input record to produce several output rows.
    #[must_use]
    pub fn expand(mut self, expand: bool) -> Self {
        self.expand = expand;
        self
    }

    /// Override the transform pool width for this job.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Use an in-process transform.
    #[must_use]
    pub fn transform<T: RecordTransform + 'static>(mut self, transform: T) -> Self {
        self.transform = TransformChoice::Direct(Arc::new(transform));
        self
    }

    /// Use a shared in-process transform.
    #[must_use]
    pub fn transform_arc(mut self, transform: Arc<dyn RecordTransform>) -> Self {
        self.transform = TransformChoice::Direct(transform);
        self
    }

    /// Describe the transform as data, resolved when the job is built.
    #[must_use]
    pub fn spec(mut self, spec: TransformSpec) -> Self {
        self.transform = TransformChoice::Spec(spec);
        self
    }

    /// Validate and build with the built-in transforms only.
    ///
    /// # Errors
    /// See [`JobBuilder::build_with`].
    pub fn build(self) -> Result<Job> {
        self.build_with(&TransformRegistry::new())
    }

    /// Validate and build, resolving registered transforms from `registry`.
    ///
    /// # Errors
    /// Returns [`PipelineError::InvalidJob`] for an empty or path-like name,
    /// an empty header, a zero chunk size or worker count, an expanding spec
    /// without the expand flag, or a spec that does not resolve.
    pub fn build_with(self, registry: &TransformRegistry) -> Result<Job> {
        let invalid = |message: String| -> anyhow::Error {
            PipelineError::InvalidJob {
                job: self.name.clone(),
                message,
            }
            .into()
        };
        if self.name.trim().is_empty() {
            return Err(invalid("job name is empty".into()));
        }
        if self.name.contains(['/', '\\']) || self.name == "." || self.name == ".." {
            return Err(invalid("job name must be a single path component".into()));
        }
        if self.header.is_empty() {
            return Err(invalid("header declares no fields".into()));
        }
        if self.chunk_size == Some(0) {
            return Err(invalid("chunk size must be at least 1".into()));
        }
        if self.workers == Some(0) {
            return Err(invalid("worker count must be at least 1".into()));
        }
        let transform = match &self.transform {
            TransformChoice::Direct(t) => Arc::clone(t),
            TransformChoice::Spec(spec) => {
                if spec.may_expand() && !self.expand {
                    return Err(invalid(
                        "transform expands records but the job does not set expand".into(),
                    ));
                }
                registry
                    .resolve(spec)
                    .map_err(|e| invalid(format!("{e:#}")))?
            }
        };
        Ok(Job {
            transform,
            name: self.name,
            header: self.header,
            chunk_size: self.chunk_size,
            expand: self.expand,
            workers: self.workers,
        })
    }
}

/// Figures for one computed job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: String,
    pub dir: PathBuf,
    pub duration: Duration,
    pub input_records: usize,
    pub output_rows: usize,
    pub partitions: usize,
    pub rounds: usize,
    pub manifest: JobManifest,
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} records -> {} rows in {} partitions ({} rounds) in {:.2}s",
            self.job,
            self.input_records,
            self.output_rows,
            self.partitions,
            self.rounds,
            self.duration.as_secs_f64()
        )
    }
}

/// Result of [`JobRunner::run`].
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// Prior output satisfied the job. The manifest is absent when the
    /// runner does not require one.
    Skipped {
        dir: PathBuf,
        manifest: Option<JobManifest>,
    },
    /// The job ran.
    Computed(JobReport),
}

impl JobOutcome {
    /// The job's output directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        match self {
            JobOutcome::Skipped { dir, .. } => dir,
            JobOutcome::Computed(report) => &report.dir,
        }
    }

    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, JobOutcome::Skipped { .. })
    }

    #[must_use]
    pub fn report(&self) -> Option<&JobReport> {
        match self {
            JobOutcome::Computed(report) => Some(report),
            JobOutcome::Skipped { .. } => None,
        }
    }
}

/// A job's run outcome together with its load report.
#[derive(Debug, Clone)]
pub struct LoadedJob {
    pub outcome: JobOutcome,
    pub load: LoadReport,
    pub load_duration: Duration,
}

/// Executes jobs against one configuration, reusing its worker pools.
pub struct JobRunner {
    config: PipelineConfig,
    checkpoints: CheckpointManager,
    dispatcher: WorkerPoolDispatcher,
    loader: BulkLoadOrchestrator,
    metrics: PipelineMetrics,
    observer: Option<Arc<dyn WorkerObserver>>,
}

impl JobRunner {
    /// Validate `config` and build the transform and load pools.
    ///
    /// # Errors
    /// Returns an error for an invalid config or if a pool cannot be built.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let config = config.validate()?;
        let metrics = PipelineMetrics::new();
        let dispatcher =
            WorkerPoolDispatcher::new(config.transform_workers)?.with_metrics(metrics.clone());
        let loader = BulkLoadOrchestrator::new(config.load_workers, config.load_failure)?
            .with_metrics(metrics.clone());
        Ok(Self {
            checkpoints: CheckpointManager::new(config.checkpoint_config()),
            config,
            dispatcher,
            loader,
            metrics,
            observer: None,
        })
    }

    /// Attach an observer to the transform pool and to any pool built for
    /// a job's worker override.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn WorkerObserver>) -> Self {
        self.dispatcher = self.dispatcher.with_observer(observer.clone());
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Whether subsequent runs discard existing output.
    #[must_use]
    pub fn clear_checkpoints(&self) -> bool {
        self.config.clear_checkpoints
    }

    /// Flip the clear-checkpoints toggle for every subsequent run.
    pub fn set_clear_checkpoints(&mut self, clear: bool) {
        if self.config.clear_checkpoints != clear {
            info!(clear, "clear-checkpoints toggled");
        }
        self.config.clear_checkpoints = clear;
        self.checkpoints = CheckpointManager::new(self.config.checkpoint_config());
    }

    /// Output directory of `job`.
    #[must_use]
    pub fn job_dir(&self, job: &Job) -> PathBuf {
        self.checkpoints.job_dir(job.name())
    }

    /// Run `job` over `source`.
    ///
    /// # Errors
    /// Any [`PipelineError`] of the checkpoint, transform or write phases,
    /// or a source read error. Partitions written by earlier rounds stay on
    /// disk and no manifest is written.
    pub fn run<S: RecordSource>(&self, job: &Job, source: S) -> Result<JobOutcome> {
        self.run_with(job, || Ok(source))
    }

    /// Run `job`, opening its source only if the job has to be computed.
    ///
    /// # Errors
    /// See [`JobRunner::run`]; errors from `open` are returned unchanged.
    pub fn run_with<S, F>(&self, job: &Job, open: F) -> Result<JobOutcome>
    where
        S: RecordSource,
        F: FnOnce() -> Result<S>,
    {
        let span = info_span!("job", job = %job.name());
        let _enter = span.enter();

        let dir = match self.checkpoints.prepare(job.name())? {
            CheckpointDecision::Skip(dir) => {
                let manifest = if self.config.require_manifest {
                    read_manifest(&dir)?
                } else {
                    None
                };
                return Ok(JobOutcome::Skipped { dir, manifest });
            }
            CheckpointDecision::Compute(dir) => dir,
        };
        let source = open()?;
        self.compute(job, source, dir).map(JobOutcome::Computed)
    }

    /// Locate the job's input CSV under the data root and run it.
    ///
    /// # Errors
    /// Returns [`PipelineError::MissingSource`] before touching any output
    /// when no input matches; otherwise see [`JobRunner::run`].
    pub fn run_discovered(&self, job: &Job) -> Result<JobOutcome> {
        let path = discover_source(&self.config.data_root, job.name())?;
        debug!(job = job.name(), input = %path.display(), "input discovered");
        self.run_with(job, || CsvSource::open(&path))
    }

    /// Run jobs in order, stopping at the first error.
    ///
    /// `open` is called for a job only when it has to be computed.
    ///
    /// # Errors
    /// The first job error, with the job name as context.
    pub fn run_all<'a, S, F, I>(&self, jobs: I, mut open: F) -> Result<Vec<JobOutcome>>
    where
        I: IntoIterator<Item = &'a Job>,
        S: RecordSource,
        F: FnMut(&Job) -> Result<S>,
    {
        let mut outcomes = Vec::new();
        for job in jobs {
            let outcome = self
                .run_with(job, || open(job))
                .with_context(|| format!("job '{}'", job.name()))?;
            outcomes.push(outcome);
        }
        for outcome in &outcomes {
            match outcome {
                JobOutcome::Computed(report) => info!(
                    job = %report.job,
                    partitions = report.partitions,
                    rows = report.output_rows,
                    seconds = report.duration.as_secs_f64(),
                    "computed"
                ),
                JobOutcome::Skipped { dir, .. } => info!(dir = %dir.display(), "skipped"),
            }
        }
        Ok(outcomes)
    }

    /// Load every partition in `dir`.
    ///
    /// # Errors
    /// See [`BulkLoadOrchestrator::load_paths`].
    pub fn load(&self, dir: impl AsRef<Path>, op: &dyn LoadOperation) -> Result<LoadReport> {
        self.loader.load_dir(dir, op)
    }

    /// Run `job`, then load its partitions (also when the run was skipped).
    ///
    /// # Errors
    /// Run errors, then load errors under the configured failure policy.
    pub fn run_and_load<S: RecordSource>(
        &self,
        job: &Job,
        source: S,
        op: &dyn LoadOperation,
    ) -> Result<LoadedJob> {
        let outcome = self.run(job, source)?;
        let started = Instant::now();
        let load = self
            .load(outcome.dir(), op)
            .with_context(|| format!("load job '{}'", job.name()))?;
        Ok(LoadedJob {
            outcome,
            load,
            load_duration: started.elapsed(),
        })
    }

    fn compute<S: RecordSource>(&self, job: &Job, source: S, dir: PathBuf) -> Result<JobReport> {
        let started = Instant::now();
        self.metrics.record_start();

        let owned_pool;
        let dispatcher = match job.workers() {
            Some(w) if w != self.dispatcher.workers() => {
                let mut pool = WorkerPoolDispatcher::new(w)?.with_metrics(self.metrics.clone());
                if let Some(observer) = &self.observer {
                    pool = pool.with_observer(observer.clone());
                }
                owned_pool = pool;
                &owned_pool
            }
            _ => &self.dispatcher,
        };
        let chunk_size = job.chunk_size().unwrap_or(self.config.default_chunk_size);
        info!(
            chunk_size,
            workers = dispatcher.workers(),
            expand = job.expand(),
            dir = %dir.display(),
            "computing job"
        );

        let chunks = source
            .chunks_of(chunk_size)
            .map(|chunk| chunk.into_iter().collect::<Result<Vec<Record>>>());
        let grouped = rounds(chunks, dispatcher.workers())
            .map(|round| round.into_iter().collect::<Result<Vec<Vec<Record>>>>());

        let writer = PartitionedWriter::new(&dir, job.header().clone());
        let mut written: Vec<PartitionInfo> = Vec::new();
        let summary: DispatchSummary =
            dispatcher.dispatch(job.transform(), job.expand(), grouped, |round| {
                for chunk in round {
                    let info = writer
                        .write(chunk.index, chunk.input_records, &chunk.rows)
                        .map_err(|e| PipelineError::PartitionWrite {
                            partition: chunk.index,
                            message: format!("{e:#}"),
                        })?;
                    self.metrics.inc_partitions_written();
                    written.push(info);
                }
                Ok(())
            })?;

        let manifest = self.checkpoints.complete(job.name(), job.header(), written)?;
        self.metrics.record_end();
        let report = JobReport {
            job: job.name().to_string(),
            dir,
            duration: started.elapsed(),
            input_records: summary.input_records,
            output_rows: summary.output_rows,
            partitions: summary.chunks,
            rounds: summary.rounds,
            manifest,
        };
        info!(%report, "job finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VecSource;
    use crate::testing::{TestDataRoot, numbered_header, numbered_source};

    #[test]
    fn builder_validates() {
        let h = numbered_header();
        assert!(Job::builder("", h.clone()).build().is_err());
        assert!(Job::builder("a/b", h.clone()).build().is_err());
        assert!(Job::builder("x", Header::new(Vec::<String>::new())).build().is_err());
        assert!(Job::builder("x", h.clone()).chunk_size(0).build().is_err());
        assert!(Job::builder("x", h.clone()).workers(0).build().is_err());

        let err = Job::builder("x", h.clone())
            .spec(TransformSpec::ExpandList { field: "v".into() })
            .build()
            .unwrap_err();
        assert!(matches!(
            PipelineError::classify(&err),
            Some(PipelineError::InvalidJob { .. })
        ));
        assert!(
            Job::builder("x", h)
                .spec(TransformSpec::ExpandList { field: "v".into() })
                .expand(true)
                .build()
                .is_ok()
        );
    }

    #[test]
    fn unknown_registered_transform_is_invalid() {
        let err = Job::builder("x", numbered_header())
            .spec(TransformSpec::Registered {
                name: "nope".into(),
                params: serde_json::Value::Null,
            })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn run_writes_partitions_and_manifest() -> Result<()> {
        let root = TestDataRoot::new()?;
        let runner = JobRunner::new(PipelineConfig::new(root.path()).with_transform_workers(2))?;
        let job = Job::builder("numbers", numbered_header()).chunk_size(100).build()?;

        let outcome = runner.run(&job, numbered_source(250))?;
        let report = outcome.report().expect("computed");
        assert_eq!(report.partitions, 3);
        assert_eq!(report.rounds, 2);
        assert_eq!(report.input_records, 250);
        let inputs: Vec<usize> = report.manifest.partitions.iter().map(|p| p.input_records).collect();
        assert_eq!(inputs, vec![100, 100, 50]);
        assert_eq!(runner.metrics().snapshot().partitions_written, 3);
        Ok(())
    }

    #[test]
    fn toggle_is_visible_and_affects_next_run() -> Result<()> {
        let root = TestDataRoot::new()?;
        let mut runner = JobRunner::new(PipelineConfig::new(root.path()))?;
        let job = Job::builder("numbers", numbered_header()).chunk_size(10).build()?;

        runner.run(&job, numbered_source(5))?;
        assert!(runner.run(&job, numbered_source(5))?.is_skipped());

        runner.set_clear_checkpoints(true);
        assert!(runner.clear_checkpoints());
        assert!(!runner.run(&job, numbered_source(5))?.is_skipped());
        Ok(())
    }

    #[test]
    fn skipped_job_never_opens_its_source() -> Result<()> {
        let root = TestDataRoot::new()?;
        let runner = JobRunner::new(PipelineConfig::new(root.path()))?;
        let job = Job::builder("numbers", numbered_header()).build()?;
        runner.run(&job, numbered_source(3))?;

        let outcome = runner.run_with(&job, || -> Result<VecSource<std::vec::IntoIter<Record>>> {
            anyhow::bail!("source should not be opened")
        });
        assert!(outcome?.is_skipped());
        Ok(())
    }
}
