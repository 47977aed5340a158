//! Test doubles and fixtures for pipeline tests.
//!
//! This module ships with the library so that downstream crates can test
//! their own transforms and load operations the same way the crate tests
//! itself. It includes:
//!
//! - **Probes**: [`ConcurrencyProbe`] counts simultaneously active workers
//! - **Stores**: [`RecordingStore`] records load statements and fails on demand
//! - **Fixtures**: numbered records, a reordering transform, CSV inputs
//! - **Assertions**: read partitions back and compare their rows
//!
//! # Quick Start
//!
//! ```
//! use chunkline::prelude::*;
//! use chunkline::testing::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let root = TestDataRoot::new()?;
//! let runner = JobRunner::new(PipelineConfig::new(root.path()).with_transform_workers(2))?;
//! let job = Job::builder("numbers", numbered_header()).chunk_size(10).build()?;
//! runner.run(&job, numbered_source(25))?;
//!
//! assert_partition_row_counts(root.job_dir("numbers"), &[10, 10, 5])?;
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;
pub mod mock_io;
pub mod probe;
pub mod store;

pub use assertions::*;
pub use fixtures::*;
pub use mock_io::*;
pub use probe::*;
pub use store::*;
