//! Batch Execution Tests
//!
//! Batching, bounded concurrency, result ordering and failure propagation
//! of the batch runner

use async_batches::batch::{BatchRunner, NoopReporter, ProgressEvent, RecordingReporter};
use async_batches::logging::init_tracing;
use async_batches::{async_batches, BatchError};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn quiet_runner(batch_size: usize, workers: usize) -> BatchRunner {
    BatchRunner::new()
        .with_batch_size(batch_size)
        .with_workers(workers)
        .with_reporter(NoopReporter)
}

#[derive(Debug, thiserror::Error)]
#[error("remote rejected batch starting at {0}")]
struct RemoteError(u32);

#[tokio::test]
async fn test_double_ten_items() {
    let items: Vec<u32> = (1..=10).collect();
    let seen = Mutex::new(Vec::new());

    let output = quiet_runner(3, 2)
        .run("double", &items, |xs| {
            seen.lock().unwrap().push(xs.to_vec());
            async move { Ok::<_, String>(xs.iter().map(|x| x * 2).collect::<Vec<_>>()) }
        })
        .await
        .expect("run should succeed");

    assert_eq!(output, vec![2, 4, 6, 8, 10, 12, 14, 16, 18, 20]);
    assert_eq!(
        seen.into_inner().unwrap(),
        vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9], vec![10]]
    );
}

#[tokio::test]
async fn test_empty_input_invokes_job_once() {
    let items: Vec<u32> = Vec::new();
    let slices = Mutex::new(Vec::new());

    let output = quiet_runner(5, 1)
        .run("empty", &items, |xs| {
            slices.lock().unwrap().push(xs.len());
            async move { Ok::<_, String>(xs.to_vec()) }
        })
        .await
        .expect("run should succeed");

    assert!(output.is_empty());
    assert_eq!(slices.into_inner().unwrap(), vec![0]);
}

#[tokio::test]
async fn test_exact_multiple_adds_trailing_empty_batch() {
    let items: Vec<u32> = (0..9).collect();
    let slices = Mutex::new(Vec::new());

    let output = quiet_runner(3, 2)
        .run("exact", &items, |xs| {
            slices.lock().unwrap().push(xs.len());
            async move { Ok::<_, String>(xs.to_vec()) }
        })
        .await
        .expect("run should succeed");

    assert_eq!(output, items);
    assert_eq!(slices.into_inner().unwrap(), vec![3, 3, 3, 0]);
}

#[tokio::test]
async fn test_results_follow_batch_order_not_completion_order() {
    let items: Vec<u32> = (0..12).collect();
    let finished = Mutex::new(Vec::new());

    let output = quiet_runner(3, 4)
        .run("reorder", &items, |xs| {
            let finished = &finished;
            // Earlier batches sleep longer, so they finish last
            let first = xs.first().copied();
            let delay = first.map(|x| 50 - u64::from(x) * 4).unwrap_or(0);
            async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                finished.lock().unwrap().push(first);
                Ok::<_, String>(xs.to_vec())
            }
        })
        .await
        .expect("run should succeed");

    assert_eq!(output, items);

    let finished = finished.into_inner().unwrap();
    assert_eq!(finished[..4], [Some(9), Some(6), Some(3), Some(0)]);
}

#[tokio::test]
async fn test_in_flight_jobs_never_exceed_workers() {
    let items: Vec<u32> = (0..20).collect();
    let in_flight = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);

    let output = quiet_runner(2, 3)
        .run("bounded", &items, |xs| {
            let in_flight = &in_flight;
            let peak = &peak;
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(xs.to_vec())
            }
        })
        .await
        .expect("run should succeed");

    assert_eq!(output, items);
    assert_eq!(peak.load(Ordering::SeqCst), 3);
    assert_eq!(in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_next_group_waits_for_slowest_job() {
    let items: Vec<u32> = (0..4).collect();
    let log = Mutex::new(Vec::new());

    quiet_runner(1, 2)
        .run("barrier", &items, |xs| {
            let log = &log;
            let id = xs.first().copied();
            log.lock().unwrap().push(format!("start {:?}", id));
            async move {
                // Batch 0 is slow; batch 2 must still wait for it
                let delay = if id == Some(0) { 30 } else { 1 };
                tokio::time::sleep(Duration::from_millis(delay)).await;
                log.lock().unwrap().push(format!("end {:?}", id));
                Ok::<_, String>(xs.to_vec())
            }
        })
        .await
        .expect("run should succeed");

    let log = log.into_inner().unwrap();
    let end_first = log.iter().position(|l| l == "end Some(0)").unwrap();
    let start_third = log.iter().position(|l| l == "start Some(2)").unwrap();
    assert!(end_first < start_third, "group 2 started early: {:?}", log);
}

#[tokio::test]
async fn test_failure_aborts_run_after_failing_group() {
    let items: Vec<u32> = (0..20).collect();
    let calls = AtomicUsize::new(0);

    let result = quiet_runner(2, 3)
        .run("failing", &items, |xs| {
            calls.fetch_add(1, Ordering::SeqCst);
            let first = xs.first().copied();
            async move {
                match first {
                    Some(8) => Err(RemoteError(8)),
                    _ => Ok(xs.to_vec()),
                }
            }
        })
        .await;

    let err = result.expect_err("run should fail");
    assert_eq!(err.batch_index(), Some(4));

    match &err {
        BatchError::JobFailure { title, source, .. } => {
            assert_eq!(title, "failing");
            assert!(source.downcast_ref::<RemoteError>().is_some());
        }
        other => panic!("unexpected error: {:?}", other),
    }

    // Groups [0, 1, 2] and [3, 4, 5] were launched; nothing after
    assert_eq!(calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_anyhow_job_errors_are_accepted() {
    let items: Vec<u32> = (0..3).collect();

    let err = quiet_runner(10, 1)
        .run("anyhow", &items, |_xs| async move {
            Err::<Vec<u32>, _>(anyhow::anyhow!("upstream unavailable"))
        })
        .await
        .expect_err("run should fail");

    assert!(err.to_string().contains("upstream unavailable"));
    assert_eq!(err.batch_index(), Some(0));
}

#[tokio::test]
async fn test_absent_results_are_skipped() {
    let items: Vec<u32> = (0..6).collect();

    // One optional value per batch; the trailing empty batch yields None
    let sums = quiet_runner(3, 2)
        .run("sums", &items, |xs| async move {
            Ok::<_, String>((!xs.is_empty()).then(|| xs.iter().sum::<u32>()))
        })
        .await
        .expect("run should succeed");

    assert_eq!(sums, vec![3, 12]);
}

#[tokio::test]
async fn test_result_type_differs_from_item_type() {
    let items = vec!["a", "bb", "ccc", "dddd"];

    let lengths = quiet_runner(3, 2)
        .run("lengths", &items, |xs| async move {
            Ok::<_, String>(xs.iter().map(|s| s.len()).collect::<Vec<usize>>())
        })
        .await
        .expect("run should succeed");

    assert_eq!(lengths, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_concurrent_runs_keep_separate_reports() {
    let first = Arc::new(RecordingReporter::new());
    let second = Arc::new(RecordingReporter::new());
    let small: Vec<u32> = (0..4).collect();
    let large: Vec<u32> = (0..40).collect();

    let run_small = BatchRunner::new()
        .with_batch_size(2)
        .with_workers(1)
        .with_reporter(first.clone());
    let run_large = BatchRunner::new()
        .with_batch_size(5)
        .with_workers(4)
        .with_reporter(second.clone());

    let (a, b) = tokio::join!(
        run_small.run("small", &small, |xs| async move {
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok::<_, String>(xs.to_vec())
        }),
        run_large.run("large", &large, |xs| async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok::<_, String>(xs.to_vec())
        }),
    );

    assert_eq!(a.unwrap(), small);
    assert_eq!(b.unwrap(), large);

    let small_summary = first.summary().unwrap();
    let large_summary = second.summary().unwrap();
    assert_eq!((small_summary.title.as_str(), small_summary.batch_count), ("small", 3));
    assert_eq!((large_summary.title.as_str(), large_summary.batch_count), ("large", 9));
    assert!(first.batches().iter().all(|p| p.title == "small"));
}

#[tokio::test]
async fn test_failure_is_reported() {
    let reporter = Arc::new(RecordingReporter::new());
    let items: Vec<u32> = (0..4).collect();

    let result = BatchRunner::new()
        .with_batch_size(2)
        .with_workers(2)
        .with_reporter(reporter.clone())
        .run("reported", &items, |_xs| async move {
            Err::<Vec<u32>, _>("disk full".to_string())
        })
        .await;

    assert!(result.is_err());
    assert!(reporter.summary().is_none());
    assert!(reporter.events().iter().any(|event| matches!(
        event,
        ProgressEvent::Failed(failure) if failure.error == "disk full"
    )));
}

#[tokio::test]
async fn test_async_batches_with_tracing_reporter() {
    init_tracing("async_batches=debug");
    let items: Vec<u32> = (1..=5).collect();

    let output = async_batches("traced", &items, 2, 2, |xs| async move {
        Ok::<_, String>(xs.iter().map(|x| x + 1).collect::<Vec<_>>())
    })
    .await
    .expect("run should succeed");

    assert_eq!(output, vec![2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn test_zero_batch_size_is_rejected() {
    let items: Vec<u32> = (0..3).collect();

    let err = async_batches("zero", &items, 0, 2, |xs| async move {
        Ok::<_, String>(xs.to_vec())
    })
    .await
    .expect_err("zero batch size must be rejected");

    assert!(matches!(err, BatchError::InvalidConfig(_)));
}
