//! Bulk loading: statements per partition, failure policies, metrics.

use anyhow::Result;
use chunkline::loader::BulkLoadOrchestrator;
use chunkline::prelude::*;
use chunkline::testing::*;
use std::sync::Arc;

fn statement_load(store: &Arc<RecordingStore>) -> StatementLoad {
    StatementLoad::new("LOAD CSV FROM '{path}' WITH HEADER AS row CREATE (:Number {v: row.v})")
        .with_client(store.clone())
        .then("FREE MEMORY")
}

#[test]
fn each_partition_is_loaded_exactly_once() -> Result<()> {
    let root = TestDataRoot::new()?;
    let runner = JobRunner::new(PipelineConfig::new(root.path()).with_load_workers(3))?;
    let job = Job::builder("numbers", numbered_header()).chunk_size(10).build()?;
    let store = Arc::new(RecordingStore::new());

    let loaded = runner.run_and_load(&job, numbered_source(45), &statement_load(&store))?;
    assert_eq!(loaded.load.attempted, 5);
    assert_eq!(loaded.load.succeeded, 5);
    assert!(loaded.load.is_success());

    let statements = store.statements();
    let loads: Vec<&String> = statements.iter().filter(|s| s.starts_with("LOAD CSV")).collect();
    assert_eq!(loads.len(), 5);
    for i in 1..=5 {
        let name = format!("partition_{i:03}.csv");
        assert_eq!(loads.iter().filter(|s| s.contains(&name)).count(), 1, "{name}");
    }
    assert_eq!(statements.iter().filter(|s| *s == "FREE MEMORY").count(), 5);

    let snapshot = runner.metrics().snapshot();
    assert_eq!(snapshot.loads_succeeded, 5);
    assert_eq!(snapshot.loads_failed, 0);
    Ok(())
}

#[test]
fn skipped_job_is_still_loaded() -> Result<()> {
    let root = TestDataRoot::new()?;
    let runner = JobRunner::new(PipelineConfig::new(root.path()))?;
    let job = Job::builder("numbers", numbered_header()).chunk_size(10).build()?;
    runner.run(&job, numbered_source(20))?;

    let store = Arc::new(RecordingStore::new());
    let loaded = runner.run_and_load(&job, numbered_source(20), &statement_load(&store))?;
    assert!(loaded.outcome.is_skipped());
    assert_eq!(loaded.load.succeeded, 2);
    Ok(())
}

#[test]
fn load_failure_aborts_by_default() -> Result<()> {
    let root = TestDataRoot::new()?;
    let runner = JobRunner::new(PipelineConfig::new(root.path()).with_load_workers(1))?;
    let job = Job::builder("numbers", numbered_header()).chunk_size(10).build()?;
    let store = Arc::new(RecordingStore::new());
    store.fail_on("partition_002.csv");

    let err = runner
        .run_and_load(&job, numbered_source(40), &statement_load(&store))
        .unwrap_err();
    match PipelineError::classify(&err) {
        Some(PipelineError::LoadOperation { path, message }) => {
            assert!(path.ends_with("partition_002.csv"));
            assert!(message.contains("rejected"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // The job output itself is complete; only the load failed.
    assert!(runner.run(&job, numbered_source(40))?.is_skipped());
    Ok(())
}

#[test]
fn continue_policy_attempts_every_partition() -> Result<()> {
    let root = TestDataRoot::new()?;
    let runner = JobRunner::new(
        PipelineConfig::new(root.path()).with_load_failure(LoadFailurePolicy::Continue),
    )?;
    let job = Job::builder("numbers", numbered_header()).chunk_size(10).build()?;
    let store = Arc::new(RecordingStore::new());
    store.fail_on("partition_001.csv");
    store.fail_on("partition_004.csv");

    let loaded = runner.run_and_load(&job, numbered_source(40), &statement_load(&store))?;
    assert_eq!(loaded.load.attempted, 4);
    assert_eq!(loaded.load.succeeded, 2);
    let failed: Vec<_> = loaded
        .load
        .failures
        .iter()
        .map(|(p, _)| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(failed, ["partition_001.csv", "partition_004.csv"]);
    assert_eq!(store.rejected(), 2);
    assert_eq!(runner.metrics().snapshot().loads_failed, 2);
    Ok(())
}

#[test]
fn orchestrator_loads_a_directory_directly() -> Result<()> {
    let root = TestDataRoot::new()?;
    let runner = JobRunner::new(PipelineConfig::new(root.path()))?;
    let job = Job::builder("numbers", numbered_header()).chunk_size(4).build()?;
    let outcome = runner.run(&job, numbered_source(10))?;

    let orchestrator = BulkLoadOrchestrator::new(30, LoadFailurePolicy::Abort)?;
    assert_eq!(orchestrator.workers(), chunkline::MAX_WORKERS);
    let store = Arc::new(RecordingStore::new());
    let report = orchestrator.load_dir(outcome.dir(), &statement_load(&store))?;
    assert_eq!(report.succeeded, 3);

    let empty = orchestrator.load_dir(root.path().join("nothing-here"), &statement_load(&store))?;
    assert_eq!(empty.attempted, 0);
    Ok(())
}
