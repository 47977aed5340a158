//! Partition files.
//!
//! Each transformed chunk is persisted as exactly one partition: a CSV file
//! whose first row is the job's declared header, followed by one row per
//! output record. Partitions are named `partition_<NNN>.csv` with a dense,
//! 1-based, zero-padded sequence number assigned at dispatch time.
//!
//! # Design notes
//! - Rows are serialized into an in-memory buffer first, hashed, then written
//!   to `<name>.tmp` and renamed into place. A partition file is therefore
//!   either complete or absent, and rewriting an index replaces it.
//! - [`list_partitions`] orders files by their numeric index, not by name, so
//!   indices past 999 still sort correctly.

use crate::record::{Header, Record};
use anyhow::{Context, Result, bail};
use csv::WriterBuilder;
use glob::{Pattern, glob};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, create_dir_all, rename};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File extension of partition files.
pub const PARTITION_EXT: &str = "csv";

const PARTITION_PREFIX: &str = "partition_";

/// Bookkeeping for one written partition, recorded in the job manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    /// 1-based partition number.
    pub index: usize,
    /// File name relative to the job directory.
    pub file_name: String,
    /// Records consumed from the source for this partition.
    pub input_records: usize,
    /// Data rows written (header excluded).
    pub rows: usize,
    /// Hex SHA-256 of the file contents.
    pub sha256: String,
}

/// File name for partition `index`, e.g. `partition_007.csv`.
#[must_use]
pub fn partition_file_name(index: usize) -> String {
    format!("{PARTITION_PREFIX}{index:03}.{PARTITION_EXT}")
}

/// Parse the partition number back out of a partition path.
#[must_use]
pub fn partition_index(path: &Path) -> Option<usize> {
    path.file_name()?
        .to_str()?
        .strip_prefix(PARTITION_PREFIX)?
        .strip_suffix(&format!(".{PARTITION_EXT}"))?
        .parse()
        .ok()
}

/// Hex SHA-256 of `data`.
#[must_use]
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Serialize a header and rows into CSV bytes.
///
/// # Errors
/// Returns an error if a row's field names differ from the header, in
/// name or in order.
pub fn encode_partition(header: &Header, rows: &[Record]) -> Result<Vec<u8>> {
    let mut buf: Vec<u8> = Vec::with_capacity(rows.len().saturating_mul(64));
    {
        let mut wtr = WriterBuilder::new().has_headers(false).from_writer(&mut buf);
        wtr.write_record(header.names())?;
        let mut field = String::new();
        for (i, row) in rows.iter().enumerate() {
            if row.header() != header {
                bail!(
                    "row #{} has fields [{}] but the partition header is [{}]",
                    i + 1,
                    row.header().names().join(", "),
                    header.names().join(", ")
                );
            }
            for v in row.values() {
                field.clear();
                std::fmt::Write::write_fmt(&mut field, format_args!("{v}"))?;
                wtr.write_field(&field)?;
            }
            wtr.write_record(None::<&[u8]>)?;
        }
        wtr.flush()?;
    }
    Ok(buf)
}

/// Writes the partitions of one job into its output directory.
#[derive(Debug, Clone)]
pub struct PartitionedWriter {
    dir: PathBuf,
    header: Header,
}

impl PartitionedWriter {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, header: Header) -> Self {
        Self {
            dir: dir.into(),
            header,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Path partition `index` is written to.
    #[must_use]
    pub fn partition_path(&self, index: usize) -> PathBuf {
        self.dir.join(partition_file_name(index))
    }

    /// Write partition `index` (header + `rows`), creating the directory if
    /// needed and replacing any earlier file for the same index.
    ///
    /// # Errors
    /// Returns an error when a row does not match the header or on any file
    /// I/O failure.
    pub fn write(&self, index: usize, input_records: usize, rows: &[Record]) -> Result<PartitionInfo> {
        let bytes = encode_partition(&self.header, rows)
            .with_context(|| format!("encode partition {index}"))?;
        let sha256 = compute_checksum(&bytes);

        create_dir_all(&self.dir).with_context(|| format!("mkdir -p {}", self.dir.display()))?;
        let file_name = partition_file_name(index);
        let path = self.dir.join(&file_name);
        let tmp = self.dir.join(format!("{file_name}.tmp"));
        {
            let mut f = File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
            f.write_all(&bytes)
                .with_context(|| format!("write {}", tmp.display()))?;
            f.sync_all()
                .with_context(|| format!("sync {}", tmp.display()))?;
        }
        rename(&tmp, &path).with_context(|| format!("rename {} into place", tmp.display()))?;
        debug!(partition = index, rows = rows.len(), path = %path.display(), "partition written");

        Ok(PartitionInfo {
            index,
            file_name,
            input_records,
            rows: rows.len(),
            sha256,
        })
    }
}

/// All partition files in `dir`, ordered by partition number.
///
/// A missing directory yields an empty list. Temporary files left by an
/// interrupted write are not partitions and are skipped.
///
/// # Errors
/// Returns an error if the directory cannot be scanned.
pub fn list_partitions(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let pattern = format!(
        "{}/{PARTITION_PREFIX}*.{PARTITION_EXT}",
        Pattern::escape(&dir.to_string_lossy())
    );
    let mut found = Vec::new();
    for entry in glob(&pattern).with_context(|| format!("invalid glob pattern: {pattern}"))? {
        let path = entry.with_context(|| format!("error reading glob entry for pattern: {pattern}"))?;
        if let Some(index) = partition_index(&path)
            && path.is_file()
        {
            found.push((index, path));
        }
    }
    found.sort_by_key(|(index, _)| *index);
    Ok(found.into_iter().map(|(_, p)| p).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;
    use std::fs;

    fn header() -> Header {
        Header::new(["id", "name"])
    }

    fn row(id: i64, name: &str) -> Record {
        Record::new(header(), vec![Value::Int(id), Value::from(name)]).unwrap()
    }

    #[test]
    fn names_are_zero_padded() {
        assert_eq!(partition_file_name(1), "partition_001.csv");
        assert_eq!(partition_file_name(1234), "partition_1234.csv");
        assert_eq!(partition_index(Path::new("/x/partition_042.csv")), Some(42));
        assert_eq!(partition_index(Path::new("/x/partition_042.csv.tmp")), None);
    }

    #[test]
    fn write_emits_header_and_rows() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let w = PartitionedWriter::new(tmp.path().join("job"), header());
        let info = w.write(1, 3, &[row(1, "a"), row(2, "b, c")])?;
        assert_eq!(info.rows, 2);
        assert_eq!(info.input_records, 3);

        let text = fs::read_to_string(w.partition_path(1))?;
        assert_eq!(text, "id,name\n1,a\n2,\"b, c\"\n");
        assert_eq!(info.sha256, compute_checksum(text.as_bytes()));
        Ok(())
    }

    #[test]
    fn empty_partition_still_has_header() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let w = PartitionedWriter::new(tmp.path(), header());
        w.write(4, 10, &[])?;
        assert_eq!(fs::read_to_string(w.partition_path(4))?, "id,name\n");
        Ok(())
    }

    #[test]
    fn rewrite_overwrites() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let w = PartitionedWriter::new(tmp.path(), header());
        w.write(1, 2, &[row(1, "a"), row(2, "b")])?;
        w.write(1, 1, &[row(9, "z")])?;
        assert_eq!(fs::read_to_string(w.partition_path(1))?, "id,name\n9,z\n");
        Ok(())
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let w = PartitionedWriter::new(tmp.path(), Header::new(["only"]));
        assert!(w.write(1, 1, &[row(1, "a")]).is_err());
        assert!(!w.partition_path(1).exists());
    }

    #[test]
    fn reordered_fields_are_rejected() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let w = PartitionedWriter::new(tmp.path(), header());
        let swapped = Record::new(Header::new(["name", "id"]), vec![Value::from("a"), Value::Int(1)])?;

        let err = w.write(1, 1, &[row(1, "a"), swapped]).unwrap_err();
        assert!(format!("{err:#}").contains("row #2 has fields [name, id]"));
        assert!(!w.partition_path(1).exists());
        Ok(())
    }

    #[test]
    fn listing_is_numeric_and_skips_temp_files() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let w = PartitionedWriter::new(tmp.path(), header());
        for i in [2, 1000, 1] {
            w.write(i, 0, &[])?;
        }
        fs::write(tmp.path().join("partition_003.csv.tmp"), "partial")?;
        fs::write(tmp.path().join("notes.csv"), "x")?;

        let names: Vec<_> = list_partitions(tmp.path())?
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["partition_001.csv", "partition_002.csv", "partition_1000.csv"]);
        assert!(list_partitions(tmp.path().join("missing"))?.is_empty());
        Ok(())
    }
}
