//! Worker-pool bounds, round barriers and completion-order independence.

use anyhow::Result;
use chunkline::dispatcher::WorkerObserver;
use chunkline::prelude::*;
use chunkline::testing::*;
use chunkline::writer::partition_file_name;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<(usize, bool)>>,
}

impl WorkerObserver for EventLog {
    fn worker_started(&self, index: usize) {
        self.events.lock().unwrap().push((index, true));
    }

    fn worker_finished(&self, index: usize) {
        self.events.lock().unwrap().push((index, false));
    }
}

#[test]
fn partition_names_ignore_completion_order() -> Result<()> {
    let root = TestDataRoot::new()?;
    let runner = JobRunner::new(PipelineConfig::new(root.path()).with_transform_workers(4))?;
    let job = Job::builder("reversed", numbered_header())
        .transform(ReverseDelay {
            ceiling: 8,
            step: Duration::from_millis(15),
        })
        .chunk_size(1)
        .build()?;

    runner.run(&job, numbered_source(8))?;
    for i in 1..=8 {
        let part = read_partition(root.job_dir("reversed").join(partition_file_name(i)))?;
        assert_eq!(part.rows, vec![vec![i.to_string()]], "partition {i}");
    }
    Ok(())
}

#[test]
fn transform_workers_never_exceed_pool_width() -> Result<()> {
    for width in [1, 3, 5] {
        let root = TestDataRoot::new()?;
        let probe = ConcurrencyProbe::new().with_hold(Duration::from_millis(5));
        let runner = JobRunner::new(PipelineConfig::new(root.path()).with_transform_workers(width))?
            .with_observer(Arc::new(probe.clone()));
        let job = Job::builder("bounded", numbered_header()).chunk_size(2).build()?;

        runner.run(&job, numbered_source(40))?;
        assert!(probe.max_active() <= width, "width {width}: saw {}", probe.max_active());
        assert_eq!(probe.total_entered(), 20);
        assert_eq!(probe.active(), 0);
    }
    Ok(())
}

#[test]
fn rounds_are_separated_by_a_barrier() -> Result<()> {
    let root = TestDataRoot::new()?;
    let log = Arc::new(EventLog::default());
    let runner = JobRunner::new(PipelineConfig::new(root.path()).with_transform_workers(2))?
        .with_observer(log.clone());
    let job = Job::builder("rounds", numbered_header())
        .transform(ReverseDelay {
            ceiling: 6,
            step: Duration::from_millis(5),
        })
        .chunk_size(1)
        .build()?;

    let report = runner.run(&job, numbered_source(6))?;
    assert_eq!(report.report().expect("job computed").rounds, 3);

    let events = log.events.lock().unwrap().clone();
    let position = |index: usize, started: bool| {
        events
            .iter()
            .position(|e| *e == (index, started))
            .expect("event recorded")
    };
    // Round k holds chunks 2k-1 and 2k.
    for k in 1..3 {
        let last_finish = position(2 * k - 1, false).max(position(2 * k, false));
        let next_start = position(2 * k + 1, true).min(position(2 * k + 2, true));
        assert!(last_finish < next_start, "round {k} overlapped round {}", k + 1);
    }
    Ok(())
}

#[test]
fn job_worker_override_uses_its_own_width() -> Result<()> {
    let root = TestDataRoot::new()?;
    let probe = ConcurrencyProbe::new().with_hold(Duration::from_millis(5));
    let runner = JobRunner::new(PipelineConfig::new(root.path()).with_transform_workers(4))?
        .with_observer(Arc::new(probe.clone()));
    let job = Job::builder("narrow", numbered_header())
        .chunk_size(1)
        .workers(1)
        .build()?;

    let outcome = runner.run(&job, numbered_source(3))?;
    assert_eq!(outcome.report().expect("job computed").rounds, 3);
    // The override pool reports to the runner's observer too.
    assert_eq!(probe.total_entered(), 3);
    assert!(probe.max_active() <= 1, "saw {}", probe.max_active());
    Ok(())
}

#[test]
fn load_workers_never_exceed_load_width() -> Result<()> {
    let root = TestDataRoot::new()?;
    let runner = JobRunner::new(
        PipelineConfig::new(root.path())
            .with_transform_workers(6)
            .with_load_workers(2),
    )?;
    let job = Job::builder("loaded", numbered_header()).chunk_size(1).build()?;

    let probe = ConcurrencyProbe::new();
    let op = |_: &Path| -> Result<()> {
        let _active = probe.enter();
        std::thread::sleep(Duration::from_millis(10));
        Ok(())
    };
    let loaded = runner.run_and_load(&job, numbered_source(12), &op)?;
    assert_eq!(loaded.load.succeeded, 12);
    assert!(probe.max_active() <= 2, "saw {}", probe.max_active());
    assert_eq!(probe.total_entered(), 12);
    Ok(())
}
