//! Pre-built records, sources and transforms for common test scenarios.

use crate::record::{Header, Record, Value};
use crate::source::VecSource;
use crate::transform::{RecordTransform, TransformOutput};
use anyhow::{Result, bail};
use std::thread;
use std::time::Duration;

/// Header of [`numbered_records`]: a single `v` column.
#[must_use]
pub fn numbered_header() -> Header {
    Header::new(["v"])
}

/// Records `v = 1..=n`.
///
/// # Example
///
/// ```
/// use chunkline::testing::numbered_records;
///
/// let records = numbered_records(3);
/// assert_eq!(records.len(), 3);
/// ```
#[must_use]
pub fn numbered_records(n: usize) -> Vec<Record> {
    (1..=n as i64).map(|v| Record::from_pairs([("v", v)])).collect()
}

/// [`numbered_records`] as a source.
#[must_use]
pub fn numbered_source(n: usize) -> VecSource<std::vec::IntoIter<Record>> {
    VecSource::new(numbered_header(), numbered_records(n))
}

/// Records carrying the given `v` values.
#[must_use]
pub fn records_with_values(values: &[i64]) -> Vec<Record> {
    values.iter().map(|v| Record::from_pairs([("v", *v)])).collect()
}

/// Identity transform that sleeps longer for smaller `v`.
///
/// With one record per chunk, chunks submitted first finish last, which
/// reverses worker completion order within a round.
#[derive(Debug, Clone)]
pub struct ReverseDelay {
    /// Largest `v` expected; it sleeps for zero steps.
    pub ceiling: i64,
    pub step: Duration,
}

impl RecordTransform for ReverseDelay {
    fn apply(&self, record: Record) -> Result<TransformOutput> {
        let Some(v) = record.get("v").and_then(Value::as_f64) else {
            bail!("record has no numeric 'v'");
        };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let steps = (self.ceiling - v as i64).max(0) as u32;
        thread::sleep(self.step * steps);
        Ok(TransformOutput::One(record))
    }
}

/// Transform that fails on the record whose `v` equals `poison`.
#[derive(Debug, Clone, Copy)]
pub struct FailOn {
    pub poison: i64,
}

impl RecordTransform for FailOn {
    fn apply(&self, record: Record) -> Result<TransformOutput> {
        if record.get("v") == Some(&Value::Int(self.poison)) {
            bail!("poisoned record v={}", self.poison);
        }
        Ok(TransformOutput::One(record))
    }
}
