//! Bounded worker pool for transforming chunks.
//!
//! The dispatcher owns one `rayon` thread pool of `W` workers, built once and
//! reused for every round. Work is submitted a *round* at a time: up to `W`
//! chunks, each handed to its own worker. [`WorkerPoolDispatcher::run_round`]
//! returns only after every chunk of the round has finished, which is the
//! round barrier.
//!
//! Partition numbers travel with the chunks ([`IndexedChunk`]) and are
//! assigned by the caller before submission, so the order in which workers
//! finish never affects naming.
//!
//! Failure is all-or-nothing per round: if any chunk's transform errors or
//! panics, the whole round's results are dropped and the first failure (by
//! partition number) is returned as [`PipelineError::TransformWorker`].

use crate::error::PipelineError;
use crate::metrics::PipelineMetrics;
use crate::record::Record;
use crate::transform::{RecordTransform, TransformOutput};
use anyhow::{Context, Result};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, info};

/// Upper bound on workers in any pool, reflecting host resource limits.
pub const MAX_WORKERS: usize = 20;

/// A chunk together with the partition number it will be written as.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub index: usize,
    pub records: Vec<Record>,
}

/// A worker's result for one chunk.
#[derive(Debug, Clone)]
pub struct TransformedChunk {
    pub index: usize,
    /// Number of source records consumed.
    pub input_records: usize,
    /// All non-discarded outputs, in input order.
    pub rows: Vec<Record>,
}

impl TransformedChunk {
    #[must_use]
    pub fn output_count(&self) -> usize {
        self.rows.len()
    }
}

/// Optional per-worker hook, called when a worker starts and finishes a chunk.
/// Used to observe concurrency in tests.
pub trait WorkerObserver: Send + Sync {
    fn worker_started(&self, index: usize);
    fn worker_finished(&self, index: usize);
}

/// Transform a chunk on the calling thread.
///
/// # Errors
/// Returns an error when the transform fails, or when it yields several rows
/// for one record although `expand` is off.
pub fn transform_chunk(
    transform: &dyn RecordTransform,
    chunk: IndexedChunk,
    expand: bool,
) -> Result<TransformedChunk> {
    let input_records = chunk.records.len();
    let mut rows = Vec::with_capacity(input_records);
    for (i, record) in chunk.records.into_iter().enumerate() {
        let out = transform
            .apply(record)
            .with_context(|| format!("record #{} of chunk {}", i + 1, chunk.index))?;
        if let TransformOutput::Many(ref many) = out
            && !expand
        {
            anyhow::bail!(
                "record #{} of chunk {} expanded into {} rows but the job does not allow expansion",
                i + 1,
                chunk.index,
                many.len()
            );
        }
        out.extend_into(&mut rows);
    }
    Ok(TransformedChunk {
        index: chunk.index,
        input_records,
        rows,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Fixed-size pool executing transforms a round at a time.
pub struct WorkerPoolDispatcher {
    pool: ThreadPool,
    workers: usize,
    metrics: PipelineMetrics,
    observer: Option<Arc<dyn WorkerObserver>>,
}

impl WorkerPoolDispatcher {
    /// Build a pool of `workers` threads, clamped to `1..=MAX_WORKERS`.
    ///
    /// # Errors
    /// Returns an error if the thread pool cannot be created.
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.clamp(1, MAX_WORKERS);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("chunkline-transform-{i}"))
            .build()
            .context("Failed to build transform worker pool")?;
        Ok(Self {
            pool,
            workers,
            metrics: PipelineMetrics::new(),
            observer: None,
        })
    }

    /// Report progress into `metrics` instead of a private counter set.
    #[must_use]
    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn WorkerObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Pool width; also the number of chunks per round.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    #[must_use]
    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Transform one round of chunks in parallel and wait for all of them.
    ///
    /// Results come back ordered by partition number. A round larger than
    /// the pool simply queues on the pool, so at most `workers` chunks are
    /// ever in flight.
    ///
    /// # Errors
    /// Returns [`PipelineError::TransformWorker`] for the lowest-numbered
    /// failing chunk; results of the other chunks in the round are discarded.
    pub fn run_round(
        &self,
        transform: &dyn RecordTransform,
        expand: bool,
        round: Vec<IndexedChunk>,
    ) -> Result<Vec<TransformedChunk>> {
        let observer = self.observer.as_deref();
        let mut results: Vec<(usize, Result<TransformedChunk>)> = self.pool.install(|| {
            round
                .into_par_iter()
                .map(|chunk| {
                    let index = chunk.index;
                    if let Some(o) = observer {
                        o.worker_started(index);
                    }
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        transform_chunk(transform, chunk, expand)
                    }))
                    .unwrap_or_else(|payload| Err(anyhow::anyhow!(panic_message(payload.as_ref()))));
                    if let Some(o) = observer {
                        o.worker_finished(index);
                    }
                    (index, outcome)
                })
                .collect()
        });
        results.sort_by_key(|(index, _)| *index);

        let mut done = Vec::with_capacity(results.len());
        for (index, outcome) in results {
            match outcome {
                Ok(chunk) => done.push(chunk),
                Err(e) => {
                    return Err(PipelineError::TransformWorker {
                        partition: index,
                        message: format!("{e:#}"),
                    }
                    .into());
                }
            }
        }

        let consumed: usize = done.iter().map(|c| c.input_records).sum();
        let emitted: usize = done.iter().map(TransformedChunk::output_count).sum();
        let total = self.metrics.add_records_processed(consumed as u64);
        self.metrics.add_rows_emitted(emitted as u64);
        self.metrics.inc_rounds_completed();
        info!(chunks = done.len(), consumed, emitted, total_processed = total, "round complete");
        Ok(done)
    }

    /// Drive rounds to completion, handing each finished round to `sink` on
    /// the calling thread before the next round starts.
    ///
    /// `rounds` yields the chunks of each round; numbering is assigned here,
    /// densely from 1, in the order chunks are pulled.
    ///
    /// # Errors
    /// Stops at the first source, transform or sink error. Rounds already
    /// handed to `sink` stay handed over.
    pub fn dispatch<R, S>(
        &self,
        transform: &dyn RecordTransform,
        expand: bool,
        rounds: R,
        mut sink: S,
    ) -> Result<DispatchSummary>
    where
        R: IntoIterator<Item = Result<Vec<Vec<Record>>>>,
        S: FnMut(Vec<TransformedChunk>) -> Result<()>,
    {
        let mut summary = DispatchSummary::default();
        let mut next_index = 1usize;
        for round in rounds {
            let round = round?;
            let indexed: Vec<IndexedChunk> = round
                .into_iter()
                .map(|records| {
                    let chunk = IndexedChunk {
                        index: next_index,
                        records,
                    };
                    next_index += 1;
                    chunk
                })
                .collect();
            debug!(
                round = summary.rounds + 1,
                first = ?indexed.first().map(|c| c.index),
                chunks = indexed.len(),
                "dispatching round"
            );
            let results = self.run_round(transform, expand, indexed)?;
            summary.rounds += 1;
            summary.chunks += results.len();
            summary.input_records += results.iter().map(|c| c.input_records).sum::<usize>();
            summary.output_rows += results.iter().map(TransformedChunk::output_count).sum::<usize>();
            sink(results)?;
        }
        Ok(summary)
    }
}

/// Totals over one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub rounds: usize,
    pub chunks: usize,
    pub input_records: usize,
    pub output_rows: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::FnTransform;

    fn records(n: i64) -> Vec<Record> {
        (0..n).map(|v| Record::from_pairs([("v", v)])).collect()
    }

    fn identity() -> FnTransform<impl Fn(Record) -> Result<TransformOutput> + Send + Sync> {
        FnTransform(|r: Record| -> Result<TransformOutput> { Ok(TransformOutput::One(r)) })
    }

    #[test]
    fn worker_count_is_clamped() -> Result<()> {
        assert_eq!(WorkerPoolDispatcher::new(0)?.workers(), 1);
        assert_eq!(WorkerPoolDispatcher::new(64)?.workers(), MAX_WORKERS);
        Ok(())
    }

    #[test]
    fn expansion_requires_flag() {
        let t = FnTransform(|r: Record| -> Result<TransformOutput> {
            Ok(TransformOutput::Many(vec![r.clone(), r]))
        });
        let chunk = || IndexedChunk {
            index: 1,
            records: records(2),
        };
        assert!(transform_chunk(&t, chunk(), false).is_err());
        assert_eq!(transform_chunk(&t, chunk(), true).unwrap().rows.len(), 4);
    }

    #[test]
    fn round_results_are_ordered_by_index() -> Result<()> {
        let d = WorkerPoolDispatcher::new(4)?;
        let round = (1..=4)
            .rev()
            .map(|index| IndexedChunk {
                index,
                records: records(3),
            })
            .collect();
        let out = d.run_round(&identity(), false, round)?;
        let order: Vec<usize> = out.iter().map(|c| c.index).collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
        assert_eq!(d.metrics().snapshot().records_processed, 12);
        Ok(())
    }

    #[test]
    fn panic_becomes_transform_error() -> Result<()> {
        let d = WorkerPoolDispatcher::new(2)?;
        let t = FnTransform(|r: Record| -> Result<TransformOutput> {
            if r.get("v") == Some(&crate::record::Value::Int(1)) {
                panic!("bad geometry");
            }
            Ok(TransformOutput::One(r))
        });
        let round = vec![
            IndexedChunk { index: 1, records: records(1) },
            IndexedChunk { index: 2, records: records(2) },
        ];
        let err = d.run_round(&t, false, round).unwrap_err();
        match PipelineError::classify(&err) {
            Some(PipelineError::TransformWorker { partition, message }) => {
                assert_eq!(*partition, 2);
                assert!(message.contains("bad geometry"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(d.metrics().snapshot().rounds_completed, 0);
        Ok(())
    }

    #[test]
    fn dispatch_numbers_chunks_densely() -> Result<()> {
        let d = WorkerPoolDispatcher::new(2)?;
        let rounds = vec![
            Ok(vec![records(2), records(2)]),
            Ok(vec![records(1)]),
        ];
        let mut seen = Vec::new();
        let summary = d.dispatch(&identity(), false, rounds, |chunks| {
            seen.extend(chunks.into_iter().map(|c| c.index));
            Ok(())
        })?;
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(
            summary,
            DispatchSummary {
                rounds: 2,
                chunks: 3,
                input_records: 5,
                output_rows: 5
            }
        );
        Ok(())
    }
}
