//! Error taxonomy for pipeline runs.
//!
//! Library functions return [`anyhow::Result`] so that context can be layered
//! on as errors travel outwards. The fatal conditions a job can hit are
//! represented by [`PipelineError`] and wrapped inside the `anyhow::Error`;
//! callers that need to react to a specific failure classify it with
//! [`PipelineError::classify`] (or `downcast_ref` directly).

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The phase of a job in which an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Validating a job definition or pipeline configuration.
    Configuration,
    /// Locating the input for a job.
    SourceDiscovery,
    /// Deciding whether prior output can be reused, or clearing it.
    Checkpoint,
    /// Applying the record transform inside a worker.
    Transform,
    /// Persisting a partition.
    Write,
    /// Loading partitions into the external store.
    Load,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Configuration => "configuration",
            Phase::SourceDiscovery => "source discovery",
            Phase::Checkpoint => "checkpoint",
            Phase::Transform => "transform",
            Phase::Write => "write",
            Phase::Load => "load",
        };
        f.write_str(s)
    }
}

/// Fatal pipeline errors. None of these are retried inside the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no input found for job '{job}' under {root}")]
    MissingSource { job: String, root: PathBuf },

    #[error("output for job '{job}' still present at {dir} after removal")]
    InconsistentCheckpoint { job: String, dir: PathBuf },

    #[error("transform failed in partition {partition}: {message}")]
    TransformWorker { partition: usize, message: String },

    #[error("writing partition {partition} failed: {message}")]
    PartitionWrite { partition: usize, message: String },

    #[error("load of {path} failed: {message}")]
    LoadOperation { path: PathBuf, message: String },

    #[error("manifest at {path} is unreadable: {message}")]
    CorruptManifest { path: PathBuf, message: String },

    #[error("invalid job '{job}': {message}")]
    InvalidJob { job: String, message: String },
}

impl PipelineError {
    /// The phase this error belongs to.
    #[must_use]
    pub fn phase(&self) -> Phase {
        match self {
            PipelineError::MissingSource { .. } => Phase::SourceDiscovery,
            PipelineError::InconsistentCheckpoint { .. } | PipelineError::CorruptManifest { .. } => {
                Phase::Checkpoint
            }
            PipelineError::InvalidJob { .. } => Phase::Configuration,
            PipelineError::TransformWorker { .. } => Phase::Transform,
            PipelineError::PartitionWrite { .. } => Phase::Write,
            PipelineError::LoadOperation { .. } => Phase::Load,
        }
    }

    /// Find the `PipelineError` carried anywhere in an `anyhow` chain.
    #[must_use]
    pub fn classify(err: &anyhow::Error) -> Option<&PipelineError> {
        err.chain().find_map(|e| e.downcast_ref::<PipelineError>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn classify_finds_error_behind_context() {
        let err: anyhow::Result<()> = Err(PipelineError::LoadOperation {
            path: "p".into(),
            message: "refused".into(),
        })
        .context("bulk load of job 'trees'");
        let err = err.unwrap_err();
        let classified = PipelineError::classify(&err).expect("pipeline error in chain");
        assert_eq!(classified.phase(), Phase::Load);
    }

    #[test]
    fn phase_names_are_human_readable() {
        assert_eq!(Phase::SourceDiscovery.to_string(), "source discovery");
        assert_eq!(Phase::Checkpoint.to_string(), "checkpoint");
    }

    #[test]
    fn every_failure_kind_has_its_own_phase() {
        let invalid = PipelineError::InvalidJob {
            job: "j".into(),
            message: "empty header".into(),
        };
        let write = PipelineError::PartitionWrite {
            partition: 3,
            message: "disk full".into(),
        };
        assert_eq!(invalid.phase(), Phase::Configuration);
        assert_eq!(write.phase(), Phase::Write);
        assert_eq!(write.to_string(), "writing partition 3 failed: disk full");
    }
}
