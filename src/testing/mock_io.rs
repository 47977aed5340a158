//! Temporary data roots for tests.
//!
//! A [`TestDataRoot`] plays the role of the pipeline's data root: input CSV
//! files are dropped into it, and job output directories appear beneath it.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A data root that is deleted when dropped.
pub struct TestDataRoot {
    #[allow(dead_code)]
    temp_dir: TempDir,
    path: PathBuf,
}

impl TestDataRoot {
    /// Create an empty data root.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary directory cannot be created.
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new().context("Failed to create temporary data root")?;
        let path = temp_dir.path().to_path_buf();
        Ok(Self { temp_dir, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Output directory a job named `name` writes to.
    #[must_use]
    pub fn job_dir(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Write an input file `file_name` into the root from a header line and
    /// raw data lines.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    ///
    /// # Example
    ///
    /// ```
    /// use chunkline::testing::TestDataRoot;
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let root = TestDataRoot::new()?;
    /// let path = root.write_csv("trees.csv", "id,geom", &["1,POINT (21 52)"])?;
    /// assert!(path.exists());
    /// # Ok(())
    /// # }
    /// ```
    pub fn write_csv(&self, file_name: &str, header: &str, lines: &[&str]) -> Result<PathBuf> {
        let path = self.path.join(file_name);
        let mut text = String::with_capacity(header.len() + lines.len() * 16);
        text.push_str(header);
        text.push('\n');
        for line in lines {
            text.push_str(line);
            text.push('\n');
        }
        fs::write(&path, text).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}
