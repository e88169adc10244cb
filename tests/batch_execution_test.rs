//! Batch execution tests
//!
//! Bounded concurrency, completeness, ordering and progress tracking for
//! the fixed-limit executor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use monitor_batch::batch::{ApiError, BatchExecutor, BatchSummary, RunOptions};
use pretty_assertions::assert_eq;
use serde_json::json;

/// Tracks how many operations are executing at once
#[derive(Default)]
struct ConcurrencyTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyTracker {
    fn enter(&self) -> usize {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        now
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[tokio::test(start_paused = true)]
async fn test_five_items_two_at_a_time() {
    monitor_batch::telemetry::init_tracing();
    let executor = BatchExecutor::new();
    let tracker = ConcurrencyTracker::default();
    let tracker = &tracker;

    let report = executor
        .run(
            (0..5u32).collect(),
            move |id| async move {
                tracker.enter();
                tokio::time::sleep(Duration::from_millis(20)).await;
                tracker.exit();
                Ok::<_, ApiError>(format!("device-{}", id))
            },
            &RunOptions::default().with_max_concurrent(2),
        )
        .await
        .expect("valid options");

    assert!(report.success);
    assert_eq!(
        report.summary,
        BatchSummary {
            total: 5,
            succeeded: 5,
            failed: 0,
        }
    );
    assert_eq!(report.results.len(), 5);
    for (i, outcome) in report.results.iter().enumerate() {
        assert_eq!(outcome.index, i);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.value(), Some(&format!("device-{}", i)));
    }
    assert_eq!(tracker.peak(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_results_ordered_despite_reverse_completion() {
    let executor = BatchExecutor::new();
    let completion_order = Mutex::new(Vec::new());
    let completion_order = &completion_order;
    let n = 8u64;

    let report = executor
        .run(
            (0..n).collect(),
            move |i| async move {
                tokio::time::sleep(Duration::from_millis(10 * (n - i))).await;
                completion_order.lock().unwrap().push(i);
                Ok::<_, ApiError>(i)
            },
            &RunOptions::default().with_max_concurrent(n as usize),
        )
        .await
        .unwrap();

    let completed: Vec<u64> = completion_order.lock().unwrap().clone();
    assert_eq!(completed, (0..n).rev().collect::<Vec<_>>());

    for (i, outcome) in report.results.iter().enumerate() {
        assert_eq!(outcome.index, i);
        assert_eq!(*outcome.value().unwrap(), i as u64);
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit_respected() {
    for limit in [1, 3, 7] {
        let executor = BatchExecutor::new();
        let tracker = ConcurrencyTracker::default();
        let tracker = &tracker;

        let report = executor
            .run(
                (0..20u64).collect(),
                move |i| async move {
                    tracker.enter();
                    tokio::time::sleep(Duration::from_millis(5 + (i * 7) % 13)).await;
                    tracker.exit();
                    Ok::<_, ApiError>(())
                },
                &RunOptions::default().with_max_concurrent(limit),
            )
            .await
            .unwrap();

        assert_eq!(report.summary.total, 20);
        assert_eq!(tracker.peak(), limit, "limit {} should be reached but never exceeded", limit);
    }
}

#[tokio::test(start_paused = true)]
async fn test_limit_above_item_count_is_full_parallelism() {
    let executor = BatchExecutor::new();
    let tracker = ConcurrencyTracker::default();
    let tracker = &tracker;

    let report = executor
        .run(
            vec!["a", "b", "c"],
            move |name| async move {
                tracker.enter();
                tokio::time::sleep(Duration::from_millis(10)).await;
                tracker.exit();
                Ok::<_, ApiError>(name.len())
            },
            &RunOptions::default().with_max_concurrent(50),
        )
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(tracker.peak(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_progress_tracking() {
    let progress_updates = Arc::new(Mutex::new(Vec::new()));
    let progress_clone = progress_updates.clone();

    let executor = BatchExecutor::new().with_progress_callback(move |completed, total| {
        progress_clone.lock().unwrap().push((completed, total));
    });

    executor
        .run(
            (0..5u32).collect(),
            |i| async move { Ok::<_, ApiError>(i) },
            &RunOptions::default().with_max_concurrent(2),
        )
        .await
        .unwrap();

    let updates = progress_updates.lock().unwrap();
    assert_eq!(*updates, vec![(1, 5), (2, 5), (3, 5), (4, 5), (5, 5)]);
}

#[tokio::test]
async fn test_report_serializes_for_tool_response() {
    let executor = BatchExecutor::new();
    let report = executor
        .run(
            vec![10u32, 20],
            |id| async move {
                if id == 20 {
                    Err(ApiError::from_status(404, "device 20 does not exist", None))
                } else {
                    Ok(json!({ "id": id, "displayName": format!("host-{}", id) }))
                }
            },
            &RunOptions::default(),
        )
        .await
        .unwrap();

    let body = report.to_json().unwrap();
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["summary"], json!({ "total": 2, "succeeded": 1, "failed": 1 }));
    assert_eq!(body["results"][0]["data"]["displayName"], json!("host-10"));
    assert_eq!(body["results"][1]["index"], json!(1));
    assert_eq!(
        body["results"][1]["error"],
        json!("Resource not found: device 20 does not exist")
    );
}

#[tokio::test]
async fn test_options_from_tool_arguments() {
    let options = RunOptions::from_json(&json!({
        "maxConcurrent": 1,
        "continueOnError": true,
        "retryOnRateLimit": false
    }))
    .unwrap();

    let executor = BatchExecutor::new();
    let report = executor
        .run(vec![1u8, 2, 3], |x| async move { Ok::<_, ApiError>(x) }, &options)
        .await
        .unwrap();

    assert_eq!(report.summary.succeeded, 3);
    assert!(RunOptions::from_json(&json!({ "maxConcurrent": -2 })).is_err());
}
