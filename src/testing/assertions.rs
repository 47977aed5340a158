//! Assertions over partition files.

use crate::writer::list_partitions;
use anyhow::{Context, Result};
use csv::ReaderBuilder;
use std::path::Path;

/// A partition read back as text: header fields and data rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionContents {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Read one partition file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid CSV.
pub fn read_partition(path: impl AsRef<Path>) -> Result<PartitionContents> {
    let path = path.as_ref();
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    let header = rdr.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for rec in rdr.records() {
        let rec = rec.with_context(|| format!("read {}", path.display()))?;
        rows.push(rec.iter().map(str::to_string).collect());
    }
    Ok(PartitionContents { header, rows })
}

/// Data row count of every partition in `dir`, by partition number.
///
/// # Errors
///
/// Returns an error if a partition cannot be read.
pub fn partition_row_counts(dir: impl AsRef<Path>) -> Result<Vec<usize>> {
    list_partitions(dir)?
        .iter()
        .map(|p| read_partition(p).map(|c| c.rows.len()))
        .collect()
}

/// Assert the row count of each partition in `dir`.
///
/// # Errors
///
/// Returns an error if a partition cannot be read.
///
/// # Panics
///
/// Panics if the counts differ from `expected`.
pub fn assert_partition_row_counts(dir: impl AsRef<Path>, expected: &[usize]) -> Result<()> {
    let dir = dir.as_ref();
    let actual = partition_row_counts(dir)?;
    assert_eq!(
        actual,
        expected,
        "Partition row counts mismatch in {}:\n  Expected: {expected:?}\n  Actual: {actual:?}",
        dir.display()
    );
    Ok(())
}

/// All data rows of all partitions in `dir`, sorted, for order-independent
/// comparison.
///
/// # Errors
///
/// Returns an error if a partition cannot be read.
pub fn all_rows_sorted(dir: impl AsRef<Path>) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    for p in list_partitions(dir)? {
        rows.extend(read_partition(&p)?.rows);
    }
    rows.sort();
    Ok(rows)
}
