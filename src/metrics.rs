//! Running counters for pipeline execution.
//!
//! [`PipelineMetrics`] is a cheap-to-clone handle over shared atomic counters.
//! The dispatcher, writer loop and load orchestrator all bump the same handle,
//! so one snapshot at the end describes the whole run.
//!
//! # Example
//!
//! ```no_run
//! use chunkline::metrics::PipelineMetrics;
//!
//! # fn main() -> anyhow::Result<()> {
//! let metrics = PipelineMetrics::new();
//! metrics.add_records_processed(100);
//! metrics.save_to_file("metrics.json")?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Default)]
struct Counters {
    records_processed: AtomicU64,
    rows_emitted: AtomicU64,
    partitions_written: AtomicU64,
    rounds_completed: AtomicU64,
    loads_succeeded: AtomicU64,
    loads_failed: AtomicU64,
}

/// Shared, thread-safe pipeline counters.
#[derive(Clone, Default)]
pub struct PipelineMetrics {
    counters: Arc<Counters>,
    window: Arc<Mutex<(Option<Instant>, Option<Instant>)>>,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub records_processed: u64,
    pub rows_emitted: u64,
    pub partitions_written: u64,
    pub rounds_completed: u64,
    pub loads_succeeded: u64,
    pub loads_failed: u64,
    /// Wall-clock time between `record_start` and `record_end`, if both ran.
    pub elapsed_ms: Option<u64>,
}

impl PipelineMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add to the cumulative count of source records transformed and return
    /// the new running total.
    pub fn add_records_processed(&self, n: u64) -> u64 {
        self.counters.records_processed.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn add_rows_emitted(&self, n: u64) {
        self.counters.rows_emitted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_partitions_written(&self) {
        self.counters.partitions_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rounds_completed(&self) {
        self.counters.rounds_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_loads_succeeded(&self) {
        self.counters.loads_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_loads_failed(&self) {
        self.counters.loads_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the start of execution.
    pub fn record_start(&self) {
        if let Ok(mut w) = self.window.lock() {
            *w = (Some(Instant::now()), None);
        }
    }

    /// Record the end of execution.
    pub fn record_end(&self) {
        if let Ok(mut w) = self.window.lock() {
            w.1 = Some(Instant::now());
        }
    }

    /// Elapsed execution time, once both ends were recorded.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        let w = self.window.lock().ok()?;
        match *w {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.counters;
        MetricsSnapshot {
            records_processed: c.records_processed.load(Ordering::Relaxed),
            rows_emitted: c.rows_emitted.load(Ordering::Relaxed),
            partitions_written: c.partitions_written.load(Ordering::Relaxed),
            rounds_completed: c.rounds_completed.load(Ordering::Relaxed),
            loads_succeeded: c.loads_succeeded.load(Ordering::Relaxed),
            loads_failed: c.loads_failed.load(Ordering::Relaxed),
            elapsed_ms: self.elapsed().map(|d| d.as_millis() as u64),
        }
    }

    /// Emit the current snapshot as one structured log event.
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            records_processed = s.records_processed,
            rows_emitted = s.rows_emitted,
            partitions_written = s.partitions_written,
            rounds_completed = s.rounds_completed,
            loads_succeeded = s.loads_succeeded,
            loads_failed = s.loads_failed,
            elapsed_ms = ?s.elapsed_ms,
            "pipeline metrics"
        );
    }

    /// Save the current snapshot as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written to.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let formatted = serde_json::to_string_pretty(&self.snapshot())?;
        let mut file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        file.write_all(formatted.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let m = PipelineMetrics::new();
        let m2 = m.clone();
        assert_eq!(m.add_records_processed(10), 10);
        assert_eq!(m2.add_records_processed(5), 15);
        m2.inc_partitions_written();
        let s = m.snapshot();
        assert_eq!(s.records_processed, 15);
        assert_eq!(s.partitions_written, 1);
        assert_eq!(s.elapsed_ms, None);
    }

    #[test]
    fn save_writes_json_snapshot() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let m = PipelineMetrics::new();
        m.record_start();
        m.inc_loads_failed();
        m.record_end();
        let path = tmp.path().join("metrics.json");
        m.save_to_file(&path)?;

        let back: MetricsSnapshot = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(back.loads_failed, 1);
        assert!(back.elapsed_ms.is_some());
        Ok(())
    }
}
