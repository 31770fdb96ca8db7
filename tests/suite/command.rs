//! Batch runs through the real external-command executor.
#![cfg(unix)]

use benchwatch_config::BenchConfig;
use benchwatch_engine::{RunMode, Session, Status, derive};
use tokio_util::sync::CancellationToken;

use crate::common::{bench_tree, root_of};

fn shell_config(script: &str) -> BenchConfig {
    let mut config = BenchConfig::default();
    config.command.program = "sh".to_string();
    config.command.args = vec!["-c".to_string(), script.to_string()];
    config.run.parallelism = 2;
    config
}

#[tokio::test]
async fn non_zero_exit_becomes_a_failed_row() {
    let dir = bench_tree(&["good_test.go", "bad_test.go"]);
    let config = shell_config(
        "case {name} in bad*) echo 'BenchmarkBad failed' >&2; exit 3;; *) echo ok;; esac",
    );
    let session =
        Session::from_config(&config, vec![root_of(&dir)], CancellationToken::new()).unwrap();

    let summary = session.run_batch().await.unwrap();

    let snapshot = derive(&session.aggregator().snapshot());
    assert_eq!((snapshot.complete, snapshot.failed), (1, 1));
    let bad = snapshot.rows.iter().find(|r| r.name == "bad_test.go").unwrap();
    assert_eq!(bad.status, Status::Failed);
    let diagnostic = bad.diagnostic.as_deref().unwrap();
    assert!(diagnostic.starts_with("exit code 3"), "{diagnostic}");
    assert!(diagnostic.contains("BenchmarkBad failed"), "{diagnostic}");
    assert!(bad.last_duration.is_some());
    assert_eq!(summary.exit_code(RunMode::Batch), 1);
}

#[tokio::test]
async fn filter_limits_targets_and_reaches_the_command() {
    let dir = bench_tree(&["sort_test.go", "hash_test.go"]);
    let mut config = shell_config("test '{filter}' = 'sort'");
    config.run.filter = "sort".to_string();
    let session =
        Session::from_config(&config, vec![root_of(&dir)], CancellationToken::new()).unwrap();

    let summary = session.run_batch().await.unwrap();

    assert_eq!((summary.total, summary.passed), (1, 1));
    let table = session.aggregator().snapshot();
    assert_eq!(table.records[0].name(), "sort_test.go");
}

#[tokio::test]
async fn missing_program_is_a_failed_outcome_not_an_error() {
    let dir = bench_tree(&["a_test.go"]);
    let mut config = BenchConfig::default();
    config.command.program = "benchwatch-no-such-program".to_string();
    let session =
        Session::from_config(&config, vec![root_of(&dir)], CancellationToken::new()).unwrap();

    let summary = session.run_batch().await.unwrap();

    assert_eq!(summary.failed, 1);
    let table = session.aggregator().snapshot();
    let diagnostic = table.records[0].last_diagnostic().unwrap();
    assert!(diagnostic.starts_with("failed to run `benchwatch-no-such-program`"));
}
