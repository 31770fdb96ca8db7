//! The run table: one status record per target, shared by every worker.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use benchwatch_types::{
    ExecutionOutcome, StatusRecord, TableSnapshot, Target, TransitionError,
};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct RunTable {
    records: Vec<StatusRecord>,
    index: HashMap<PathBuf, usize>,
    generation: u64,
    discovery_complete: bool,
}

impl RunTable {
    fn insert_if_absent(&mut self, target: &Target) -> (usize, bool) {
        if let Some(&slot) = self.index.get(target.path()) {
            return (slot, false);
        }
        let slot = self.records.len();
        self.records.push(StatusRecord::new(target, slot as u64));
        self.index.insert(target.path().to_path_buf(), slot);
        (slot, true)
    }

    fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}

#[derive(Debug)]
struct Inner {
    table: Mutex<RunTable>,
    generation_tx: watch::Sender<u64>,
}

/// Cloneable handle to the shared run table.
///
/// Every accessor takes the lock for a short, non-async critical section and
/// publishes the new generation so the dashboard can redraw.
#[derive(Debug, Clone)]
pub struct Aggregator {
    inner: Arc<Inner>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    #[must_use]
    pub fn new() -> Self {
        let (generation_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                table: Mutex::new(RunTable::default()),
                generation_tx,
            }),
        }
    }

    fn table(&self) -> MutexGuard<'_, RunTable> {
        lock_or_recover(&self.inner.table)
    }

    fn publish(&self, generation: u64) {
        self.inner.generation_tx.send_replace(generation);
    }

    /// Add a `Pending` record for `target`. Returns `false` if it was known.
    pub fn register(&self, target: &Target) -> bool {
        let generation = {
            let mut table = self.table();
            let (_, inserted) = table.insert_if_absent(target);
            if !inserted {
                return false;
            }
            table.bump()
        };
        tracing::trace!(target = %target, "registered");
        self.publish(generation);
        true
    }

    /// Mark `target` as running, registering it first if needed.
    pub fn record_start(&self, target: &Target) -> Result<(), TransitionError> {
        let generation = {
            let mut table = self.table();
            let (slot, _) = table.insert_if_absent(target);
            table.records[slot].begin()?;
            table.bump()
        };
        tracing::debug!(target = %target, "running");
        self.publish(generation);
        Ok(())
    }

    /// Record the result of a running execution.
    pub fn record_outcome(&self, outcome: &ExecutionOutcome) -> Result<(), TransitionError> {
        let target = outcome.target();
        let generation = {
            let mut table = self.table();
            let Some(&slot) = table.index.get(target.path()) else {
                return Err(TransitionError::Unknown {
                    path: target.path().to_path_buf(),
                });
            };
            table.records[slot].finish(outcome)?;
            table.bump()
        };

        let duration_ms = outcome.duration().as_millis() as u64;
        if outcome.succeeded() {
            tracing::info!(target = %target, duration_ms, "complete");
        } else {
            tracing::warn!(target = %target, duration_ms, "failed");
        }
        self.publish(generation);
        Ok(())
    }

    /// Seal the set of targets discovered by the initial walk.
    pub fn mark_discovery_complete(&self) {
        let generation = {
            let mut table = self.table();
            if table.discovery_complete {
                return;
            }
            table.discovery_complete = true;
            table.bump()
        };
        tracing::debug!("discovery complete");
        self.publish(generation);
    }

    #[must_use]
    pub fn snapshot(&self) -> TableSnapshot {
        let table = self.table();
        TableSnapshot {
            records: table.records.clone(),
            generation: table.generation,
            discovery_complete: table.discovery_complete,
        }
    }

    /// Receiver that changes on every table mutation.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.generation_tx.subscribe()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
