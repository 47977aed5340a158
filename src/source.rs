//! Record sources.
//!
//! A source is a single-pass, sequential stream of records that all match one
//! declared [`Header`]. The pipeline drains it on the control thread, so
//! sources need not be `Send`.
//!
//! - [`VecSource`] wraps an in-memory collection or any record iterator.
//! - [`CsvSource`] streams a delimited file with a header row.
//! - [`discover_source`] finds a job's input file by name under a data root.

use crate::error::PipelineError;
use crate::record::{Header, Record, Value};
use anyhow::{Context, Result};
use csv::StringRecord;
use glob::{MatchOptions, Pattern, glob_with};
use std::fs::File;
use std::path::{Path, PathBuf};

/// A sequential record stream with a known header.
pub trait RecordSource: Iterator<Item = Result<Record>> {
    /// Field names every record of this source carries.
    fn header(&self) -> &Header;
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn header(&self) -> &Header {
        (**self).header()
    }
}

/// Source over an iterator of already-built records.
pub struct VecSource<I> {
    header: Header,
    records: I,
}

impl VecSource<std::vec::IntoIter<Record>> {
    /// Source over an owned vector of records.
    #[must_use]
    pub fn new(header: Header, records: Vec<Record>) -> Self {
        Self {
            header,
            records: records.into_iter(),
        }
    }
}

impl<I: Iterator<Item = Record>> VecSource<I> {
    /// Source over a lazily produced record iterator.
    pub fn from_records(header: Header, records: I) -> Self {
        Self { header, records }
    }
}

impl<I: Iterator<Item = Record>> Iterator for VecSource<I> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next().map(Ok)
    }
}

impl<I: Iterator<Item = Record>> RecordSource for VecSource<I> {
    fn header(&self) -> &Header {
        &self.header
    }
}

/// Streaming reader over a CSV file whose first row is the header.
///
/// Only one row is held in memory at a time; field types are inferred with
/// [`Value::parse`].
pub struct CsvSource {
    path: PathBuf,
    header: Header,
    reader: csv::Reader<File>,
    row: StringRecord,
    line: u64,
    done: bool,
}

impl CsvSource {
    /// Open `path` and read its header row.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or has no readable header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let f = File::open(&path).with_context(|| format!("open {}", path.display()))?;
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(f);
        let header = Header::new(
            reader
                .headers()
                .with_context(|| format!("read header of {}", path.display()))?
                .iter(),
        );
        Ok(Self {
            path,
            header,
            reader,
            row: StringRecord::new(),
            line: 0,
            done: false,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for CsvSource {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_record(&mut self.row) {
            Ok(true) => {
                self.line += 1;
                let values = self.row.iter().map(Value::parse).collect();
                Some(Record::new(self.header.clone(), values).with_context(|| {
                    format!("CSV record #{} of {}", self.line, self.path.display())
                }))
            }
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(anyhow::Error::new(e).context(format!(
                    "parse CSV record #{} of {}",
                    self.line + 1,
                    self.path.display()
                ))))
            }
        }
    }
}

impl RecordSource for CsvSource {
    fn header(&self) -> &Header {
        &self.header
    }
}

/// Find the input file for job `name`: the first `*.csv` file (extension
/// matched case-insensitively) directly under `data_root` whose file name
/// contains `name`. Candidates are taken in file-name order.
///
/// # Errors
/// Returns [`PipelineError::MissingSource`] when nothing matches.
pub fn discover_source(data_root: impl AsRef<Path>, name: &str) -> Result<PathBuf> {
    let root = data_root.as_ref();
    let pattern = format!(
        "{}/*{}*.csv",
        Pattern::escape(&root.to_string_lossy()),
        Pattern::escape(name)
    );
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };
    let mut found = Vec::new();
    for entry in glob_with(&pattern, options).with_context(|| format!("invalid glob pattern: {pattern}"))? {
        let path = entry.with_context(|| format!("error reading glob entry for pattern: {pattern}"))?;
        // The name match itself must be exact; only the extension ignores case.
        let contains = path
            .file_name()
            .and_then(|f| f.to_str())
            .is_some_and(|f| f.contains(name));
        if path.is_file() && contains {
            found.push(path);
        }
    }
    found.sort();
    found.into_iter().next().ok_or_else(|| {
        PipelineError::MissingSource {
            job: name.to_string(),
            root: root.to_path_buf(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn csv_source_streams_typed_records() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("trees.csv");
        fs::write(&path, "id,species,geometry\n1,oak,POINT (1 2)\n2,,POINT (3 4)\n")?;

        let mut src = CsvSource::open(&path)?;
        assert_eq!(src.header().names(), ["id", "species", "geometry"]);
        let first = src.next().unwrap()?;
        assert_eq!(first.get("id"), Some(&Value::Int(1)));
        assert_eq!(first.get("geometry"), Some(&Value::Point { x: 1.0, y: 2.0 }));
        let second = src.next().unwrap()?;
        assert_eq!(second.get("species"), Some(&Value::Null));
        assert!(src.next().is_none());
        Ok(())
    }

    #[test]
    fn csv_source_reports_ragged_row() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("bad.csv");
        fs::write(&path, "a,b\n1,2\n3\n")?;

        let rows: Vec<_> = CsvSource::open(&path)?.collect();
        assert!(rows[0].is_ok());
        let err = rows[1].as_ref().unwrap_err();
        assert!(format!("{err:#}").contains("#2"));
        Ok(())
    }

    #[test]
    fn discover_matches_name_and_extension() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        fs::write(tmp.path().join("poland_roads.CSV"), "a\n")?;
        fs::write(tmp.path().join("trees.txt"), "a\n")?;
        fs::create_dir(tmp.path().join("roads"))?;

        let found = discover_source(tmp.path(), "roads")?;
        assert_eq!(found.file_name().unwrap(), "poland_roads.CSV");

        let err = discover_source(tmp.path(), "trees").unwrap_err();
        assert!(matches!(
            PipelineError::classify(&err),
            Some(PipelineError::MissingSource { .. })
        ));
        Ok(())
    }
}
