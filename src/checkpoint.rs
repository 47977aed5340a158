//! Job-level checkpointing.
//!
//! Every job owns one directory `<data_root>/<job name>`. The checkpoint
//! manager decides, before a job runs, whether that directory already holds
//! the job's complete output (skip) or has to be (re)built.
//!
//! # Completion marker
//!
//! A directory by itself does not prove a job finished: a crash mid-run leaves
//! a directory too. When all partitions have been written the runner calls
//! [`CheckpointManager::complete`], which writes `_MANIFEST.json` listing every
//! partition with its row counts and SHA-256. With `require_manifest` set
//! (the default) only a directory with a valid manifest is reused; anything
//! else is cleared and recomputed. With it unset, directory presence alone
//! short-circuits.
//!
//! # Usage
//!
//! ```no_run
//! use chunkline::checkpoint::{CheckpointConfig, CheckpointDecision, CheckpointManager};
//!
//! # fn main() -> anyhow::Result<()> {
//! let manager = CheckpointManager::new(CheckpointConfig {
//!     data_root: "/data".into(),
//!     ..Default::default()
//! });
//! match manager.prepare("trees")? {
//!     CheckpointDecision::Skip(dir) => println!("reusing {}", dir.display()),
//!     CheckpointDecision::Compute(dir) => println!("building {}", dir.display()),
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::PipelineError;
use crate::record::Header;
use crate::writer::{PartitionInfo, compute_checksum, list_partitions};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, create_dir_all, read_dir, remove_dir, remove_dir_all, rename};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Name of the completion manifest inside a job directory.
pub const MANIFEST_FILE: &str = "_MANIFEST.json";

/// Configuration for checkpoint decisions.
#[derive(Clone, Debug)]
pub struct CheckpointConfig {
    /// Directory holding one sub-directory per job.
    pub data_root: PathBuf,
    /// Discard existing output and recompute.
    pub clear: bool,
    /// Only reuse output that carries a valid completion manifest.
    pub require_manifest: bool,
    /// When reusing output, check every partition against its recorded checksum.
    pub verify_checksums: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./data"),
            clear: false,
            require_manifest: true,
            verify_checksums: true,
        }
    }
}

/// Outcome of [`CheckpointManager::prepare`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointDecision {
    /// Existing output satisfies the job; nothing to compute.
    Skip(PathBuf),
    /// The directory is absent (or was just cleared); build it.
    Compute(PathBuf),
}

impl CheckpointDecision {
    #[must_use]
    pub fn dir(&self) -> &Path {
        match self {
            CheckpointDecision::Skip(d) | CheckpointDecision::Compute(d) => d,
        }
    }

    #[must_use]
    pub fn is_skip(&self) -> bool {
        matches!(self, CheckpointDecision::Skip(_))
    }
}

/// Completion record written after the last partition of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobManifest {
    pub job: String,
    pub header: Vec<String>,
    pub partitions: Vec<PartitionInfo>,
    pub input_records: u64,
    pub output_rows: u64,
    /// Milliseconds since the Unix epoch.
    pub completed_at_ms: u64,
}

/// Decides skip vs. rebuild per job and records job completion.
#[derive(Clone, Debug)]
pub struct CheckpointManager {
    config: CheckpointConfig,
}

impl CheckpointManager {
    #[must_use]
    pub fn new(config: CheckpointConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    /// Output directory of job `name`.
    #[must_use]
    pub fn job_dir(&self, name: &str) -> PathBuf {
        self.config.data_root.join(name)
    }

    /// Decide whether job `name` must run.
    ///
    /// - no directory: compute;
    /// - directory and `clear`: remove it, then compute;
    /// - directory, no `clear`: skip if the output is complete, otherwise
    ///   remove the leftovers and compute.
    ///
    /// # Errors
    /// Returns [`PipelineError::InconsistentCheckpoint`] if a removal leaves a
    /// non-empty directory behind.
    pub fn prepare(&self, name: &str) -> Result<CheckpointDecision> {
        let dir = self.job_dir(name);
        if !dir.exists() {
            debug!(job = name, dir = %dir.display(), "no prior output");
            return Ok(CheckpointDecision::Compute(dir));
        }
        if self.config.clear {
            info!(job = name, dir = %dir.display(), "clearing prior output");
            self.clear_dir(name, &dir)?;
            return Ok(CheckpointDecision::Compute(dir));
        }
        if self.is_complete(name, &dir)? {
            info!(job = name, dir = %dir.display(), "output already complete, skipping");
            return Ok(CheckpointDecision::Skip(dir));
        }
        warn!(job = name, dir = %dir.display(), "incomplete output found, rebuilding");
        self.clear_dir(name, &dir)?;
        Ok(CheckpointDecision::Compute(dir))
    }

    /// Whether `dir` holds the complete output of job `name` under the
    /// configured policy.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be read.
    pub fn is_complete(&self, name: &str, dir: &Path) -> Result<bool> {
        if !self.config.require_manifest {
            return dir_has_entries(dir);
        }
        let manifest = match read_manifest(dir) {
            Ok(Some(m)) => m,
            Ok(None) => return Ok(false),
            Err(e) => {
                let message = format!("{e:#}");
                warn!(job = name, error = %message, "ignoring unreadable manifest");
                return Ok(false);
            }
        };
        if manifest.job != name {
            return Ok(false);
        }
        let on_disk = list_partitions(dir)?;
        if on_disk.len() != manifest.partitions.len() {
            return Ok(false);
        }
        if self.config.verify_checksums {
            for part in &manifest.partitions {
                let path = dir.join(&part.file_name);
                let Ok(bytes) = fs::read(&path) else {
                    return Ok(false);
                };
                if compute_checksum(&bytes) != part.sha256 {
                    warn!(job = name, partition = part.index, "checksum mismatch");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Record that job `name` finished, writing its manifest atomically.
    ///
    /// # Errors
    /// Returns an error if the manifest cannot be serialized or written.
    pub fn complete(
        &self,
        name: &str,
        header: &Header,
        mut partitions: Vec<PartitionInfo>,
    ) -> Result<JobManifest> {
        partitions.sort_by_key(|p| p.index);
        let manifest = JobManifest {
            job: name.to_string(),
            header: header.names().to_vec(),
            input_records: partitions.iter().map(|p| p.input_records as u64).sum(),
            output_rows: partitions.iter().map(|p| p.rows as u64).sum(),
            partitions,
            completed_at_ms: current_timestamp_ms(),
        };
        let dir = self.job_dir(name);
        create_dir_all(&dir).with_context(|| format!("mkdir -p {}", dir.display()))?;
        let encoded = serde_json::to_vec_pretty(&manifest).context("Failed to serialize manifest")?;
        let tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
        {
            let mut file = File::create(&tmp).context("Failed to create manifest file")?;
            file.write_all(&encoded).context("Failed to write manifest")?;
            file.sync_all().context("Failed to sync manifest to disk")?;
        }
        rename(&tmp, dir.join(MANIFEST_FILE)).context("Failed to move manifest into place")?;
        info!(
            job = name,
            partitions = manifest.partitions.len(),
            rows = manifest.output_rows,
            "job output complete"
        );
        Ok(manifest)
    }

    /// Remove all output of job `name`.
    ///
    /// # Errors
    /// See [`CheckpointManager::prepare`].
    pub fn clear(&self, name: &str) -> Result<()> {
        let dir = self.job_dir(name);
        if dir.exists() {
            self.clear_dir(name, &dir)?;
        }
        Ok(())
    }

    fn clear_dir(&self, name: &str, dir: &Path) -> Result<()> {
        if let Err(e) = remove_dir_all(dir) {
            warn!(job = name, dir = %dir.display(), error = %e, "recursive removal failed");
        }
        verify_cleared(name, dir)
    }
}

/// Fail unless `dir` is gone. An empty leftover directory is removed.
pub(crate) fn verify_cleared(name: &str, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    if !dir_has_entries(dir)? {
        remove_dir(dir).ok();
    }
    if dir.exists() {
        return Err(PipelineError::InconsistentCheckpoint {
            job: name.to_string(),
            dir: dir.to_path_buf(),
        }
        .into());
    }
    Ok(())
}

fn dir_has_entries(dir: &Path) -> Result<bool> {
    Ok(read_dir(dir)
        .with_context(|| format!("read {}", dir.display()))?
        .next()
        .is_some())
}

/// Read the manifest of a job directory, if there is one.
///
/// # Errors
/// Returns [`PipelineError::CorruptManifest`] if the file exists but does not
/// parse.
pub fn read_manifest(dir: impl AsRef<Path>) -> Result<Option<JobManifest>> {
    let path = dir.as_ref().join(MANIFEST_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
    let manifest = serde_json::from_slice(&bytes).map_err(|e| PipelineError::CorruptManifest {
        path: path.clone(),
        message: e.to_string(),
    })?;
    Ok(Some(manifest))
}

/// Get current timestamp in milliseconds since epoch.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::PartitionedWriter;
    use tempfile::TempDir;

    fn manager(root: &Path, clear: bool) -> CheckpointManager {
        CheckpointManager::new(CheckpointConfig {
            data_root: root.to_path_buf(),
            clear,
            ..Default::default()
        })
    }

    fn build_job(m: &CheckpointManager, name: &str) -> Result<()> {
        let header = Header::new(["v"]);
        let w = PartitionedWriter::new(m.job_dir(name), header.clone());
        let parts = vec![w.write(1, 0, &[])?, w.write(2, 0, &[])?];
        m.complete(name, &header, parts)?;
        Ok(())
    }

    #[test]
    fn verify_cleared_rejects_residual_files() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("job");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("partition_001.csv"), "v\n").unwrap();

        let err = verify_cleared("job", &dir).unwrap_err();
        assert!(matches!(
            PipelineError::classify(&err),
            Some(PipelineError::InconsistentCheckpoint { .. })
        ));
    }

    #[test]
    fn verify_cleared_removes_empty_leftover() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("job");
        fs::create_dir(&dir).unwrap();
        verify_cleared("job", &dir).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn complete_output_is_skipped() -> Result<()> {
        let tmp = TempDir::new()?;
        let m = manager(tmp.path(), false);
        assert!(!m.prepare("trees")?.is_skip());
        build_job(&m, "trees")?;
        assert_eq!(m.prepare("trees")?, CheckpointDecision::Skip(m.job_dir("trees")));
        Ok(())
    }

    #[test]
    fn missing_manifest_forces_rebuild() -> Result<()> {
        let tmp = TempDir::new()?;
        let m = manager(tmp.path(), false);
        let w = PartitionedWriter::new(m.job_dir("roads"), Header::new(["v"]));
        w.write(1, 0, &[])?;

        assert!(!m.prepare("roads")?.is_skip());
        assert!(!m.job_dir("roads").exists());
        Ok(())
    }

    #[test]
    fn tampered_partition_forces_rebuild() -> Result<()> {
        let tmp = TempDir::new()?;
        let m = manager(tmp.path(), false);
        build_job(&m, "trees")?;
        fs::write(m.job_dir("trees").join("partition_002.csv"), "v\n-1\n")?;
        assert!(!m.prepare("trees")?.is_skip());
        Ok(())
    }

    #[test]
    fn directory_presence_suffices_without_manifest_requirement() -> Result<()> {
        let tmp = TempDir::new()?;
        let m = CheckpointManager::new(CheckpointConfig {
            data_root: tmp.path().to_path_buf(),
            require_manifest: false,
            ..Default::default()
        });
        fs::create_dir_all(m.job_dir("a"))?;
        // An empty directory is not output.
        assert!(!m.prepare("a")?.is_skip());

        fs::create_dir_all(m.job_dir("b"))?;
        fs::write(m.job_dir("b").join("partition_001.csv"), "v\n")?;
        assert!(m.prepare("b")?.is_skip());
        Ok(())
    }

    #[test]
    fn clear_toggle_removes_complete_output() -> Result<()> {
        let tmp = TempDir::new()?;
        build_job(&manager(tmp.path(), false), "trees")?;

        let m = manager(tmp.path(), true);
        assert_eq!(m.prepare("trees")?, CheckpointDecision::Compute(m.job_dir("trees")));
        assert!(!m.job_dir("trees").exists());
        Ok(())
    }

    #[test]
    fn corrupt_manifest_is_reported() -> Result<()> {
        let tmp = TempDir::new()?;
        fs::write(tmp.path().join(MANIFEST_FILE), "{not json")?;
        let err = read_manifest(tmp.path()).unwrap_err();
        assert!(matches!(
            PipelineError::classify(&err),
            Some(PipelineError::CorruptManifest { .. })
        ));
        Ok(())
    }
}
