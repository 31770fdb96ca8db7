//! Batch runs over temporary benchmark trees with a scripted runner.

use std::sync::Arc;
use std::time::Duration;

use benchwatch_engine::{DashboardFeed, RunMode, Status, derive};
use tokio_util::sync::CancellationToken;

use crate::common::{Script, ScriptedExecutor, bench_tree, session};

#[tokio::test(start_paused = true)]
async fn sequential_targets_sum_their_durations() {
    let dir = bench_tree(&["a_test.go", "b_test.go", "c_test.go"]);
    let executor = ScriptedExecutor::new(&[
        ("a_test.go", Script::pass(500)),
        ("b_test.go", Script::pass(1000)),
        ("c_test.go", Script::pass(200)),
    ]);
    let shutdown = CancellationToken::new();
    let session = session(&dir, executor.clone(), 1, &shutdown);

    let summary = session.run_batch().await.unwrap();

    let snapshot = derive(&session.aggregator().snapshot());
    assert_eq!(snapshot.complete, 3);
    assert_eq!(snapshot.total_duration, Duration::from_millis(1700));
    assert!((snapshot.percent_complete - 100.0).abs() < 1e-9);
    assert_eq!(summary.passed, 3);
    assert_eq!(summary.exit_code(RunMode::Batch), 0);

    let order: Vec<String> = executor
        .calls()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(order, vec!["a_test.go", "b_test.go", "c_test.go"]);
    assert_eq!(executor.peak(), 1);
}

#[tokio::test(start_paused = true)]
async fn one_failure_fails_the_batch() {
    let dir = bench_tree(&["good_test.go", "bad_test.go"]);
    let executor = ScriptedExecutor::new(&[
        ("good_test.go", Script::pass(50)),
        ("bad_test.go", Script::fail(30, "exit code 1\n\n--- FAIL: BenchmarkBad\nFAIL")),
    ]);
    let shutdown = CancellationToken::new();
    let session = session(&dir, executor, 2, &shutdown);

    let summary = session.run_batch().await.unwrap();

    let snapshot = derive(&session.aggregator().snapshot());
    assert_eq!((snapshot.complete, snapshot.failed), (1, 1));
    let failed = snapshot
        .rows
        .iter()
        .find(|row| row.status == Status::Failed)
        .unwrap();
    assert_eq!(failed.name, "bad_test.go");
    assert!(!failed.diagnostic.as_deref().unwrap_or("").is_empty());
    assert_eq!(summary.exit_code(RunMode::Batch), 1);
}

#[tokio::test(start_paused = true)]
async fn every_target_reaches_a_terminal_state() {
    let names: Vec<String> = (0..25).map(|i| format!("pkg{}/t{i:02}_test.go", i % 3)).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let dir = bench_tree(&refs);
    let executor = ScriptedExecutor::uniform(Script::pass(20));
    let shutdown = CancellationToken::new();
    let session = session(&dir, executor.clone(), 4, &shutdown);

    let summary = session.run_batch().await.unwrap();

    let table = session.aggregator().snapshot();
    assert_eq!(table.len(), 25);
    assert!(table.discovery_complete);
    assert!(table.records.iter().all(|r| r.status().is_terminal()));
    assert!(table.records.iter().all(|r| r.runs() == 1));
    assert_eq!(executor.call_count(), 25);
    assert!(executor.peak() <= 4);
    assert_eq!(executor.max_per_target(), 1);
    assert_eq!((summary.total, summary.passed, summary.pending), (25, 25, 0));

    // Names are relative to the root.
    assert!(table.records.iter().any(|r| r.name() == "pkg0/t00_test.go"));
}

#[tokio::test(start_paused = true)]
async fn progress_never_goes_backwards() {
    let names: Vec<String> = (0..12).map(|i| format!("t{i:02}_test.go")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let dir = bench_tree(&refs);
    let executor = ScriptedExecutor::uniform(Script::pass(35));
    let shutdown = CancellationToken::new();
    let session = Arc::new(session(&dir, executor, 3, &shutdown));

    let mut feed = DashboardFeed::new(session.aggregator().clone(), Duration::from_millis(5));
    let run = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.run_batch().await })
    };

    let mut percents = Vec::new();
    while !run.is_finished() {
        percents.push(feed.next().await.percent_complete);
    }
    run.await.unwrap().unwrap();
    percents.push(feed.current().percent_complete);

    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    assert!((percents[percents.len() - 1] - 100.0).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn shutdown_mid_batch_leaves_no_running_rows() {
    let names: Vec<String> = (0..6).map(|i| format!("slow{i}_test.go")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let dir = bench_tree(&refs);
    let executor = ScriptedExecutor::uniform(Script::pass(10_000));
    let shutdown = CancellationToken::new();
    let session = Arc::new(session(&dir, executor, 2, &shutdown));

    let run = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.run_batch().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("batch did not stop after shutdown")
        .unwrap()
        .unwrap();

    let snapshot = derive(&session.aggregator().snapshot());
    assert_eq!(snapshot.running, 0);
    assert_eq!(snapshot.complete, 0);
    assert!(snapshot.failed >= 1);
    assert!(
        snapshot
            .rows
            .iter()
            .filter(|row| row.status == Status::Failed)
            .all(|row| row.diagnostic.as_deref() == Some("cancelled at shutdown"))
    );
    assert_eq!(summary.exit_code(RunMode::Batch), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_tree_finishes_cleanly() {
    let dir = bench_tree(&["README.md", "main.go"]);
    let executor = ScriptedExecutor::uniform(Script::pass(1));
    let shutdown = CancellationToken::new();
    let session = session(&dir, executor.clone(), 2, &shutdown);

    let summary = session.run_batch().await.unwrap();

    assert_eq!(summary.total, 0);
    assert_eq!(executor.call_count(), 0);
    assert!(derive(&session.aggregator().snapshot()).is_settled());
    assert_eq!(summary.exit_code(RunMode::Batch), 0);
}
