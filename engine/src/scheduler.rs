//! Bounded intake queue and worker pool.
//!
//! Ownership: every `Intake` clone is a sender; the channel closes when the
//! last one is dropped by whoever feeds it. Workers share the single receiver
//! and exit once it is closed and drained, or on shutdown.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use benchwatch_types::{ExecutionOutcome, Target};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::SetupError;
use crate::aggregator::Aggregator;
use crate::executor::Executor;

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub parallelism: usize,
    pub intake_capacity: usize,
    /// How long in-flight executions may keep running after shutdown.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            parallelism: 1,
            intake_capacity: benchwatch_config::DEFAULT_INTAKE_CAPACITY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl SchedulerSettings {
    pub fn validate(&self) -> Result<(), SetupError> {
        if self.parallelism == 0 {
            return Err(SetupError::ZeroParallelism);
        }
        Ok(())
    }
}

/// Result of handing a target to the intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Accepted,
    /// The path was already queued or running.
    Collapsed,
    /// The pool is gone.
    Closed,
}

type Outstanding = Arc<Mutex<HashSet<PathBuf>>>;

/// Producer handle for the worker pool.
#[derive(Debug, Clone)]
pub struct Intake {
    tx: mpsc::Sender<Target>,
    outstanding: Outstanding,
    token: CancellationToken,
}

impl Intake {
    /// Queue `target`, waiting while the queue is full.
    pub async fn submit(&self, target: Target) -> Submission {
        if self.token.is_cancelled() {
            return Submission::Closed;
        }
        if !self.claim(&target) {
            return Submission::Collapsed;
        }
        let path = target.path().to_path_buf();
        tokio::select! {
            sent = self.tx.send(target) => {
                if sent.is_ok() {
                    return Submission::Accepted;
                }
            }
            () = self.token.cancelled() => {}
        }
        lock_or_recover(&self.outstanding).remove(&path);
        Submission::Closed
    }

    /// Blocking variant for producers running off the async runtime.
    pub fn blocking_submit(&self, target: Target) -> Submission {
        if self.token.is_cancelled() {
            return Submission::Closed;
        }
        if !self.claim(&target) {
            return Submission::Collapsed;
        }
        let path = target.path().to_path_buf();
        if self.tx.blocking_send(target).is_ok() {
            return Submission::Accepted;
        }
        lock_or_recover(&self.outstanding).remove(&path);
        Submission::Closed
    }

    fn claim(&self, target: &Target) -> bool {
        let claimed = lock_or_recover(&self.outstanding).insert(target.path().to_path_buf());
        if !claimed {
            tracing::debug!(target = %target, "already queued or running, collapsing");
        }
        claimed
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed() || self.token.is_cancelled()
    }
}

pub struct Scheduler {
    workers: Vec<JoinHandle<()>>,
    token: CancellationToken,
}

impl Scheduler {
    /// Spawn `parallelism` workers. Must be called inside a tokio runtime.
    pub fn start(
        settings: SchedulerSettings,
        executor: Arc<dyn Executor>,
        aggregator: Aggregator,
        shutdown: &CancellationToken,
    ) -> Result<(Self, Intake), SetupError> {
        settings.validate()?;

        let token = shutdown.child_token();
        let (tx, rx) = mpsc::channel(settings.intake_capacity.max(1));
        let rx = Arc::new(AsyncMutex::new(rx));
        let outstanding: Outstanding = Arc::default();

        let workers = (0..settings.parallelism)
            .map(|id| {
                let worker = Worker {
                    id,
                    rx: Arc::clone(&rx),
                    executor: Arc::clone(&executor),
                    aggregator: aggregator.clone(),
                    outstanding: Arc::clone(&outstanding),
                    token: token.clone(),
                    grace: settings.shutdown_grace,
                };
                tokio::spawn(worker.run())
            })
            .collect();

        tracing::debug!(workers = settings.parallelism, "scheduler started");
        let intake = Intake {
            tx,
            outstanding,
            token: token.clone(),
        };
        Ok((Self { workers, token }, intake))
    }

    /// Wait for every worker to exit.
    pub async fn join(&mut self) {
        for handle in self.workers.drain(..) {
            if let Err(err) = handle.await {
                tracing::error!("worker ended abnormally: {err}");
            }
        }
    }

    /// Stop taking work, let in-flight executions finish within the grace
    /// period, and wait for the workers. Repeated calls are no-ops.
    pub async fn shutdown(&mut self) {
        self.token.cancel();
        self.join().await;
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct Worker {
    id: usize,
    rx: Arc<AsyncMutex<mpsc::Receiver<Target>>>,
    executor: Arc<dyn Executor>,
    aggregator: Aggregator,
    outstanding: Outstanding,
    token: CancellationToken,
    grace: Duration,
}

impl Worker {
    async fn run(self) {
        loop {
            let next = {
                let mut rx = self.rx.lock().await;
                tokio::select! {
                    biased;
                    () = self.token.cancelled() => None,
                    target = rx.recv() => target,
                }
            };
            let Some(target) = next else {
                break;
            };

            match self.aggregator.record_start(&target) {
                Ok(()) => {
                    let outcome = self.execute(&target).await;
                    if let Err(err) = self.aggregator.record_outcome(&outcome) {
                        tracing::error!(target = %target, "could not record outcome: {err}");
                    }
                }
                Err(err) => {
                    tracing::error!(target = %target, "could not start: {err}");
                }
            }
            lock_or_recover(&self.outstanding).remove(target.path());
        }
        tracing::trace!(worker = self.id, "worker exiting");
    }

    async fn execute(&self, target: &Target) -> ExecutionOutcome {
        let started = Instant::now();
        let mut run = self.executor.execute(target);

        tokio::select! {
            outcome = &mut run => return outcome,
            () = self.token.cancelled() => {}
        }

        match tokio::time::timeout(self.grace, &mut run).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(target = %target, "cancelled at shutdown");
                ExecutionOutcome::failure(
                    target.clone(),
                    started.elapsed(),
                    "cancelled at shutdown",
                )
            }
        }
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
