//! Watch mode driven by injected raw change notifications.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use benchwatch_engine::{
    ChangeKind, ChangeWatcher, RawChange, RunMode, RunSummary, Session, SetupError, WatchSettings,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::common::{Script, ScriptedExecutor, bench_tree, root_of, session_with};

fn settings() -> WatchSettings {
    WatchSettings {
        debounce: Duration::from_millis(100),
        extensions: vec!["go".to_string()],
        ..WatchSettings::default()
    }
}

struct Harness {
    raw: mpsc::Sender<RawChange>,
    run: JoinHandle<Result<RunSummary, SetupError>>,
    shutdown: CancellationToken,
}

impl Harness {
    fn start(session: Session, shutdown: CancellationToken) -> Self {
        let (raw, raw_rx) = mpsc::channel(64);
        let watcher = ChangeWatcher::from_raw(raw_rx, settings(), &shutdown);
        let session = Arc::new(session);
        let run = tokio::spawn(async move { session.run_watch(watcher).await });
        Self {
            raw,
            run,
            shutdown,
        }
    }

    async fn save(&self, path: &Path) {
        self.raw
            .send(RawChange::new(path, ChangeKind::Write))
            .await
            .unwrap();
    }

    async fn stop(self) -> RunSummary {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.run)
            .await
            .expect("watch loop did not stop")
            .unwrap()
            .unwrap()
    }
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[tokio::test(start_paused = true)]
async fn burst_of_saves_runs_once() {
    let dir = bench_tree(&["x_test.go"]);
    let target: PathBuf = root_of(&dir).join("x_test.go");
    let executor = ScriptedExecutor::uniform(Script::pass(20));
    let shutdown = CancellationToken::new();
    let harness = Harness::start(
        session_with(&dir, executor.clone(), 1, false, &shutdown),
        shutdown,
    );

    tokio::time::sleep(ms(10)).await;
    for _ in 0..5 {
        harness.save(&target).await;
        tokio::time::sleep(ms(10)).await;
    }
    tokio::time::sleep(ms(500)).await;

    assert_eq!(executor.call_count(), 1);
    let summary = harness.stop().await;
    assert_eq!((summary.total, summary.passed), (1, 1));
    assert_eq!(summary.exit_code(RunMode::Watch), 0);
}

#[tokio::test(start_paused = true)]
async fn saves_outside_the_window_run_again() {
    let dir = bench_tree(&["x_test.go"]);
    let target = root_of(&dir).join("x_test.go");
    let executor = ScriptedExecutor::uniform(Script::pass(20));
    let shutdown = CancellationToken::new();
    let harness = Harness::start(
        session_with(&dir, executor.clone(), 1, false, &shutdown),
        shutdown,
    );

    tokio::time::sleep(ms(10)).await;
    harness.save(&target).await;
    tokio::time::sleep(ms(300)).await;
    harness.save(&target).await;
    tokio::time::sleep(ms(300)).await;

    assert_eq!(executor.call_count(), 2);
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn change_to_a_helper_reruns_its_directory() {
    let dir = bench_tree(&["pkg/a_test.go", "pkg/b_test.go", "pkg/helper.go", "other/c_test.go"]);
    let root = root_of(&dir);
    let executor = ScriptedExecutor::uniform(Script::pass(20));
    let shutdown = CancellationToken::new();
    let harness = Harness::start(
        session_with(&dir, executor.clone(), 2, false, &shutdown),
        shutdown,
    );

    tokio::time::sleep(ms(10)).await;
    harness.save(&root.join("pkg/helper.go")).await;
    tokio::time::sleep(ms(400)).await;

    let mut ran: Vec<PathBuf> = executor.calls();
    ran.sort();
    assert_eq!(ran, vec![root.join("pkg/a_test.go"), root.join("pkg/b_test.go")]);
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn irrelevant_extensions_are_ignored() {
    let dir = bench_tree(&["x_test.go", "notes.txt"]);
    let executor = ScriptedExecutor::uniform(Script::pass(20));
    let shutdown = CancellationToken::new();
    let harness = Harness::start(
        session_with(&dir, executor.clone(), 1, false, &shutdown),
        shutdown,
    );

    tokio::time::sleep(ms(10)).await;
    harness.save(&root_of(&dir).join("notes.txt")).await;
    tokio::time::sleep(ms(400)).await;

    assert_eq!(executor.call_count(), 0);
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn change_during_a_run_never_overlaps_it() {
    let dir = bench_tree(&["x_test.go"]);
    let target = root_of(&dir).join("x_test.go");
    let executor = ScriptedExecutor::uniform(Script::pass(300));
    let shutdown = CancellationToken::new();
    let harness = Harness::start(
        session_with(&dir, executor.clone(), 4, false, &shutdown),
        shutdown,
    );

    tokio::time::sleep(ms(10)).await;
    // Fires at ~110ms and runs until ~410ms.
    harness.save(&target).await;
    tokio::time::sleep(ms(150)).await;
    // Fires at ~260ms while the first run is in flight: collapsed.
    harness.save(&target).await;
    tokio::time::sleep(ms(450)).await;
    // Fires after the first run finished: runs again.
    harness.save(&target).await;
    tokio::time::sleep(ms(600)).await;

    assert_eq!(executor.max_per_target(), 1);
    assert_eq!(executor.call_count(), 2);
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn initial_run_executes_every_target() {
    let dir = bench_tree(&["a_test.go", "b_test.go", "c_test.go"]);
    let executor = ScriptedExecutor::uniform(Script::pass(20));
    let shutdown = CancellationToken::new();
    let harness = Harness::start(
        session_with(&dir, executor.clone(), 2, true, &shutdown),
        shutdown,
    );

    tokio::time::sleep(ms(200)).await;
    assert_eq!(executor.call_count(), 3);

    let summary = harness.stop().await;
    assert_eq!(summary.passed, 3);
}

#[tokio::test(start_paused = true)]
async fn shutdown_before_any_event_is_clean() {
    let dir = bench_tree(&["x_test.go"]);
    let executor = ScriptedExecutor::uniform(Script::pass(20));
    let shutdown = CancellationToken::new();
    let harness = Harness::start(
        session_with(&dir, executor.clone(), 1, false, &shutdown),
        shutdown,
    );

    let summary = harness.stop().await;
    assert_eq!(executor.call_count(), 0);
    assert_eq!(summary.passed, 0);
}

#[tokio::test(start_paused = true)]
async fn watcher_stop_is_idempotent() {
    let shutdown = CancellationToken::new();
    let (raw, raw_rx) = mpsc::channel(4);
    let mut watcher = ChangeWatcher::from_raw(raw_rx, settings(), &shutdown);
    let mut events = watcher.events().unwrap();
    assert!(watcher.events().is_none());

    watcher.stop().await;
    watcher.stop().await;
    assert!(events.recv().await.is_none());
    // The raw side may outlive the watcher without panicking.
    let _ = raw.send(RawChange::new("/tmp/x_test.go", ChangeKind::Write)).await;
}

#[tokio::test]
async fn real_watcher_rejects_missing_roots() {
    let dir = bench_tree(&["x_test.go"]);
    let missing = root_of(&dir).join("does-not-exist");
    let shutdown = CancellationToken::new();
    let result = ChangeWatcher::start(&[missing], settings(), &shutdown);
    assert!(result.is_err());
}
