//! Line-oriented reporters fed by a real pipeline run.

use std::sync::Arc;
use std::time::Duration;

use benchwatch_engine::DashboardFeed;
use benchwatch_tui::{CsvReporter, JsonReporter, Reporter};
use tokio_util::sync::CancellationToken;

use crate::common::{Script, ScriptedExecutor, bench_tree, session};

/// Run a batch while streaming snapshots into `reporter`, then finish it.
async fn run_with(reporter: &mut dyn Reporter, executor: Arc<ScriptedExecutor>, names: &[&str]) {
    let dir = bench_tree(names);
    let shutdown = CancellationToken::new();
    let session = Arc::new(session(&dir, executor, 2, &shutdown));
    let mut feed = DashboardFeed::new(session.aggregator().clone(), Duration::from_millis(10));

    let run = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.run_batch().await })
    };
    while !run.is_finished() {
        reporter.update(&feed.next().await).unwrap();
    }
    let summary = run.await.unwrap().unwrap();
    reporter.finish(&feed.current(), &summary).unwrap();
}

#[tokio::test(start_paused = true)]
async fn ndjson_has_one_result_per_target_and_a_summary() {
    let executor = ScriptedExecutor::new(&[
        ("a_test.go", Script::pass(40)),
        ("b_test.go", Script::fail(60, "exit code 1\n\nFAIL")),
        ("c_test.go", Script::pass(20)),
    ]);
    let mut reporter = JsonReporter::new(Vec::new());
    run_with(&mut reporter, executor, &["a_test.go", "b_test.go", "c_test.go"]).await;

    let text = String::from_utf8(reporter.into_inner()).unwrap();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(lines.len(), 4);
    let results: Vec<&serde_json::Value> =
        lines.iter().filter(|l| l["type"] == "result").collect();
    assert_eq!(results.len(), 3);
    let mut names: Vec<&str> = results.iter().map(|l| l["name"].as_str().unwrap()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["a_test.go", "b_test.go", "c_test.go"]);

    let failed = results.iter().find(|l| l["status"] == "failed").unwrap();
    assert_eq!(failed["name"], "b_test.go");
    assert_eq!(failed["diagnostic"], "exit code 1\n\nFAIL");

    let summary = &lines[3];
    assert_eq!(summary["type"], "summary");
    assert_eq!(summary["total"], 3);
    assert_eq!(summary["passed"], 2);
    assert_eq!(summary["failed"], 1);
    assert!((summary["total_duration_ms"].as_f64().unwrap() - 120.0).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn csv_has_a_header_and_one_row_per_target() {
    let executor = ScriptedExecutor::uniform(Script::pass(25));
    let mut reporter = CsvReporter::new(Vec::new());
    run_with(&mut reporter, executor, &["a_test.go", "b_test.go"]).await;

    let text = String::from_utf8(reporter.into_inner()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("timestamp,name,path,status"));
    assert!(lines[1..].iter().all(|l| l.contains(",complete,25.000,40.0000,1,")));
}
