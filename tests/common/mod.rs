//! Shared test utilities and fixtures
//!
//! A scripted executor that stands in for the external benchmark runner, and
//! temporary benchmark trees for discovery.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use benchwatch_engine::{
    Discovery, ExecFut, ExecutionOutcome, Executor, SchedulerSettings, Session, SessionSettings,
    Target, TargetMatcher,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// What the fake runner does for one target file name.
#[derive(Debug, Clone)]
pub struct Script {
    pub duration: Duration,
    pub failure: Option<String>,
}

impl Script {
    pub fn pass(ms: u64) -> Self {
        Self {
            duration: Duration::from_millis(ms),
            failure: None,
        }
    }

    pub fn fail(ms: u64, diagnostic: &str) -> Self {
        Self {
            duration: Duration::from_millis(ms),
            failure: Some(diagnostic.to_string()),
        }
    }
}

/// Sleeps for the scripted duration and reports it, tracking concurrency.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: HashMap<String, Script>,
    default: Option<Script>,
    calls: Mutex<Vec<PathBuf>>,
    in_flight: Mutex<HashMap<PathBuf, usize>>,
    max_per_target: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(scripts: &[(&str, Script)]) -> Arc<Self> {
        Arc::new(Self {
            scripts: scripts
                .iter()
                .map(|(name, script)| ((*name).to_string(), script.clone()))
                .collect(),
            ..Self::default()
        })
    }

    /// Every target not named explicitly runs with `script`.
    pub fn uniform(script: Script) -> Arc<Self> {
        Arc::new(Self {
            default: Some(script),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of simultaneous executions of any single target.
    pub fn max_per_target(&self) -> usize {
        self.max_per_target.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous executions overall.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn script_for(&self, target: &Target) -> Script {
        let name = target
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.scripts
            .get(&name)
            .or(self.default.as_ref())
            .cloned()
            .unwrap_or_else(|| Script::pass(1))
    }

    fn enter(&self, path: &Path) {
        self.calls.lock().unwrap().push(path.to_path_buf());
        let mut in_flight = self.in_flight.lock().unwrap();
        let count = in_flight.entry(path.to_path_buf()).or_insert(0);
        *count += 1;
        self.max_per_target.fetch_max(*count, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self, path: &Path) {
        if let Some(count) = self.in_flight.lock().unwrap().get_mut(path) {
            *count -= 1;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Executor for ScriptedExecutor {
    fn execute<'a>(&'a self, target: &'a Target) -> ExecFut<'a> {
        Box::pin(async move {
            let script = self.script_for(target);
            self.enter(target.path());
            tokio::time::sleep(script.duration).await;
            self.leave(target.path());
            match script.failure {
                None => ExecutionOutcome::success(target.clone(), script.duration),
                Some(diagnostic) => {
                    ExecutionOutcome::failure(target.clone(), script.duration, diagnostic)
                }
            }
        })
    }
}

/// Temporary directory holding one empty file per name (subdirectories allowed).
pub fn bench_tree(names: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in names {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, "package bench\n").unwrap();
    }
    dir
}

/// Canonical root path, matching what discovery reports.
pub fn root_of(dir: &TempDir) -> PathBuf {
    dir.path().canonicalize().unwrap()
}

pub fn session(
    dir: &TempDir,
    executor: Arc<dyn Executor>,
    parallelism: usize,
    shutdown: &CancellationToken,
) -> Session {
    session_with(dir, executor, parallelism, true, shutdown)
}

pub fn session_with(
    dir: &TempDir,
    executor: Arc<dyn Executor>,
    parallelism: usize,
    initial_run: bool,
    shutdown: &CancellationToken,
) -> Session {
    let matcher = TargetMatcher::new(&["*_test.go"], ".").unwrap();
    let settings = SessionSettings {
        scheduler: SchedulerSettings {
            parallelism,
            intake_capacity: 4,
            shutdown_grace: Duration::from_millis(100),
        },
        initial_run,
    };
    Session::new(
        Discovery::new(vec![root_of(dir)], matcher),
        executor,
        settings,
        shutdown.clone(),
    )
}
