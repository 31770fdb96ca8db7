//! Per-path quiet-window coalescing of raw filesystem notifications.
//!
//! The debouncer is a plain data structure; the caller supplies the clock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use benchwatch_types::{ChangeEvent, ChangeKind};
use tokio::time::Instant;

/// One notification as delivered by the backend, before coalescing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub observed_at: SystemTime,
}

impl RawChange {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            observed_at: SystemTime::now(),
        }
    }
}

#[derive(Debug)]
struct PendingChange {
    change: RawChange,
    deadline: Instant,
}

#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, PendingChange>,
}

impl Debouncer {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a notification. The latest notification for a path replaces
    /// any pending one and pushes its deadline out by a full window.
    ///
    /// Returns `true` when an existing pending entry was replaced.
    pub fn push(&mut self, change: RawChange, now: Instant) -> bool {
        let deadline = now + self.window;
        let path = change.path.clone();
        self.pending
            .insert(path, PendingChange { change, deadline })
            .is_some()
    }

    /// Earliest deadline among pending entries.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.deadline).min()
    }

    /// Remove and return every entry whose quiet window has elapsed, oldest
    /// deadline first.
    pub fn drain_due(&mut self, now: Instant) -> Vec<ChangeEvent> {
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();

        let mut fired: Vec<PendingChange> = due
            .into_iter()
            .filter_map(|path| self.pending.remove(&path))
            .collect();
        fired.sort_by(|a, b| {
            a.deadline
                .cmp(&b.deadline)
                .then_with(|| a.change.path.cmp(&b.change.path))
        });

        fired
            .into_iter()
            .map(|pending| ChangeEvent {
                path: pending.change.path,
                kind: pending.change.kind,
                observed_at: pending.change.observed_at,
            })
            .collect()
    }

    /// Drop everything still waiting. Returns how many entries were dropped.
    pub fn discard(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
