//! End-to-end wiring of one benchwatch run, batch or watch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use benchwatch_config::BenchConfig;
use benchwatch_types::DashboardSnapshot;
use tokio_util::sync::CancellationToken;

use crate::aggregator::Aggregator;
use crate::dashboard::derive;
use crate::discovery::{Discovery, TargetMatcher};
use crate::executor::{CommandExecutor, CommandSpec, Executor};
use crate::scheduler::{Intake, Scheduler, SchedulerSettings, Submission};
use crate::watcher::ChangeWatcher;
use crate::{SetupError, WatchError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Batch,
    Watch,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub scheduler: SchedulerSettings,
    /// Watch mode: run every discovered target before waiting for changes.
    pub initial_run: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            scheduler: SchedulerSettings::default(),
            initial_run: true,
        }
    }
}

/// Final tally of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Targets that never reached a terminal state.
    pub pending: usize,
    pub duration: Duration,
}

impl RunSummary {
    #[must_use]
    pub fn from_snapshot(snapshot: &DashboardSnapshot, duration: Duration) -> Self {
        Self {
            total: snapshot.total,
            passed: snapshot.complete,
            failed: snapshot.failed,
            pending: snapshot.pending + snapshot.running,
            duration,
        }
    }

    /// Process exit code. Batch runs fail when anything failed or never ran.
    #[must_use]
    pub fn exit_code(&self, mode: RunMode) -> i32 {
        match mode {
            RunMode::Batch if self.failed > 0 || self.pending > 0 => 1,
            RunMode::Batch | RunMode::Watch => 0,
        }
    }
}

pub struct Session {
    discovery: Arc<Discovery>,
    executor: Arc<dyn Executor>,
    aggregator: Aggregator,
    settings: SessionSettings,
    shutdown: CancellationToken,
}

impl Session {
    #[must_use]
    pub fn new(
        discovery: Discovery,
        executor: Arc<dyn Executor>,
        settings: SessionSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            discovery: Arc::new(discovery),
            executor,
            aggregator: Aggregator::new(),
            settings,
            shutdown,
        }
    }

    /// Session over resolved `roots` running the configured external command.
    pub fn from_config(
        config: &BenchConfig,
        roots: Vec<PathBuf>,
        shutdown: CancellationToken,
    ) -> Result<Self, SetupError> {
        let matcher = TargetMatcher::new(&config.discovery.patterns, &config.run.filter)?;
        let spec = CommandSpec::from_config(&config.command, &config.run.filter, config.run.timeout());
        let settings = SessionSettings {
            scheduler: SchedulerSettings {
                parallelism: config.run.parallelism,
                intake_capacity: config.run.intake_capacity,
                ..SchedulerSettings::default()
            },
            initial_run: config.watch.initial_run,
        };
        settings.scheduler.validate()?;
        Ok(Self::new(
            Discovery::new(roots, matcher),
            Arc::new(CommandExecutor::new(spec)),
            settings,
            shutdown,
        ))
    }

    #[must_use]
    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    #[must_use]
    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Discover, run everything once, and wait for the pool to drain.
    pub async fn run_batch(&self) -> Result<RunSummary, SetupError> {
        let started = Instant::now();
        let (mut scheduler, intake) = Scheduler::start(
            self.settings.scheduler,
            Arc::clone(&self.executor),
            self.aggregator.clone(),
            &self.shutdown,
        )?;

        // The discovery task owns the only intake; the queue closes when it ends.
        let submitted = self.discover(Some(intake)).await;
        tracing::info!(submitted, "discovery finished");

        scheduler.join().await;
        Ok(self.summary(started))
    }

    /// Run until shutdown, re-running targets affected by each change.
    pub async fn run_watch(&self, mut watcher: ChangeWatcher) -> Result<RunSummary, SetupError> {
        let started = Instant::now();
        let Some(mut events) = watcher.events() else {
            watcher.stop().await;
            return Err(WatchError::EventsTaken.into());
        };

        let (mut scheduler, intake) = match Scheduler::start(
            self.settings.scheduler,
            Arc::clone(&self.executor),
            self.aggregator.clone(),
            &self.shutdown,
        ) {
            Ok(started) => started,
            Err(err) => {
                watcher.stop().await;
                return Err(err);
            }
        };

        let initial = self.settings.initial_run.then(|| intake.clone());
        let submitted = self.discover(initial).await;
        tracing::info!(submitted, "initial pass queued, watching for changes");

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::info!("change stream closed");
                        break;
                    };
                    self.rerun_for_change(&intake, &event).await;
                }
            }
        }

        drop(intake);
        watcher.stop().await;
        scheduler.shutdown().await;
        tracing::info!(stats = ?watcher.stats(), "watch stopped");
        Ok(self.summary(started))
    }

    async fn rerun_for_change(&self, intake: &Intake, event: &benchwatch_types::ChangeEvent) {
        let targets = self.discovery.targets_for_change(event);
        tracing::info!(
            path = %event.path.display(),
            kind = %event.kind,
            targets = targets.len(),
            "change detected"
        );
        for target in targets {
            self.aggregator.register(&target);
            if intake.submit(target).await == Submission::Closed {
                break;
            }
        }
    }

    /// Walk the roots on a blocking thread, registering every target and,
    /// when an intake is given, submitting it. Seals discovery at the end.
    async fn discover(&self, intake: Option<Intake>) -> usize {
        let discovery = Arc::clone(&self.discovery);
        let aggregator = self.aggregator.clone();
        let shutdown = self.shutdown.clone();

        let task = tokio::task::spawn_blocking(move || {
            let mut walk = discovery.walk();
            let mut submitted = 0usize;
            let mut found = 0usize;
            for target in walk.by_ref() {
                if shutdown.is_cancelled() {
                    break;
                }
                found += 1;
                aggregator.register(&target);
                let Some(intake) = intake.as_ref() else {
                    continue;
                };
                match intake.blocking_submit(target) {
                    Submission::Accepted => submitted += 1,
                    Submission::Collapsed => {}
                    Submission::Closed => break,
                }
            }
            if !walk.diagnostics().is_empty() {
                tracing::warn!(
                    skipped = walk.diagnostics().len(),
                    "some paths could not be read during discovery"
                );
            }
            if found == 0 && walk.filtered_out() > 0 {
                tracing::warn!(
                    filter = discovery.matcher().filter_pattern(),
                    rejected = walk.filtered_out(),
                    "filter matched no targets; it applies to paths relative to the root"
                );
            }
            aggregator.mark_discovery_complete();
            submitted
        });

        match task.await {
            Ok(submitted) => submitted,
            Err(err) => {
                tracing::error!("discovery task failed: {err}");
                self.aggregator.mark_discovery_complete();
                0
            }
        }
    }

    fn summary(&self, started: Instant) -> RunSummary {
        let snapshot = derive(&self.aggregator.snapshot());
        RunSummary::from_snapshot(&snapshot, started.elapsed())
    }
}
