//! # Chunkline
//!
//! A **chunked parallel transform-and-checkpoint pipeline** for very large
//! record streams. Chunkline drains a sequential record source in bounded
//! chunks, transforms the chunks on a fixed-size worker pool a *round* at a
//! time, persists one CSV partition per chunk, and bulk-loads the partitions
//! into an external store with a second, smaller concurrency bound.
//!
//! ## Key Features
//!
//! - **Bounded memory** - only one chunk per worker is ever materialized
//! - **True parallelism** - CPU-bound transforms run on a persistent `rayon` pool
//! - **Deterministic naming** - `partition_001.csv`, `partition_002.csv`, ...
//!   assigned before dispatch, independent of completion order
//! - **Resumable jobs** - a completion manifest lets a rerun skip finished jobs
//! - **Transforms as data** - a serde-tagged [`TransformSpec`] or any Rust closure
//! - **Bounded loads** - one load per partition, abort or continue on failure
//!
//! ## Quick Start
//!
//! ```
//! use chunkline::prelude::*;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! # let tmp = tempfile::tempdir()?;
//! let runner = JobRunner::new(PipelineConfig::new(tmp.path()).with_transform_workers(4))?;
//!
//! let header = Header::new(["v"]);
//! let records: Vec<Record> = (-5..5_i64).map(|v| Record::from_pairs([("v", v)])).collect();
//!
//! let job = Job::builder("positives", header.clone())
//!     .spec(TransformSpec::DiscardBelow { field: "v".into(), threshold: 0.0 })
//!     .chunk_size(4)
//!     .build()?;
//!
//! let outcome = runner.run(&job, VecSource::new(header, records))?;
//! let report = outcome.report().unwrap();
//! assert_eq!(report.partitions, 3);
//! assert_eq!(report.output_rows, 5);
//!
//! // Running again reuses the finished output.
//! # let records: Vec<Record> = Vec::new();
//! # let header = Header::new(["v"]);
//! assert!(runner.run(&job, VecSource::new(header, records))?.is_skipped());
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Chunks and rounds
//!
//! The [`chunker`] turns the source into chunks of at most `chunk_size`
//! records, then groups chunks into rounds as wide as the transform pool.
//! A round is dispatched as a whole and the next one starts only after every
//! chunk of the current round is done.
//!
//! ### Partitions
//!
//! Every chunk becomes exactly one partition file: the job's header plus one
//! row per output record, even when the transform discarded everything.
//!
//! ### Checkpoints
//!
//! Each job owns `<data_root>/<job name>`. Before a job runs the
//! [`checkpoint`] manager decides whether that directory already holds the
//! complete output (skip) or must be rebuilt. Setting
//! [`PipelineConfig::clear_checkpoints`] forces a rebuild.
//!
//! ### Errors
//!
//! Every fatal condition is a [`PipelineError`] naming its [`Phase`],
//! carried inside an `anyhow::Error`.
//!
//! ## Logging
//!
//! The crate logs through `tracing` and never installs a subscriber; call
//! [`logging::init_logging`] from a binary to see output.

pub mod checkpoint;
pub mod chunker;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod loader;
pub mod logging;
pub mod metrics;
pub mod record;
pub mod source;
pub mod testing;
pub mod transform;
pub mod writer;

pub use checkpoint::{CheckpointConfig, CheckpointDecision, CheckpointManager, JobManifest};
pub use chunker::{Chunker, IteratorChunkExt, rounds};
pub use config::PipelineConfig;
pub use dispatcher::{DispatchSummary, MAX_WORKERS, WorkerObserver, WorkerPoolDispatcher};
pub use error::{Phase, PipelineError};
pub use job::{Job, JobBuilder, JobOutcome, JobReport, JobRunner, LoadedJob};
pub use loader::{
    BulkLoadOrchestrator, LoadFailurePolicy, LoadOperation, LoadReport, StatementLoad, StoreClient,
};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use record::{Header, Record, Value};
pub use source::{CsvSource, RecordSource, VecSource, discover_source};
pub use transform::{FnTransform, RecordTransform, TransformOutput, TransformRegistry, TransformSpec};
pub use writer::{PartitionInfo, PartitionedWriter, list_partitions, partition_file_name};

/// The types most pipelines need.
pub mod prelude {
    pub use crate::config::PipelineConfig;
    pub use crate::error::PipelineError;
    pub use crate::job::{Job, JobOutcome, JobRunner};
    pub use crate::loader::{LoadFailurePolicy, LoadOperation, StatementLoad, StoreClient};
    pub use crate::record::{Header, Record, Value};
    pub use crate::source::{CsvSource, RecordSource, VecSource};
    pub use crate::transform::{FnTransform, RecordTransform, TransformOutput, TransformSpec};
}
