//! Dashboard state derived from run-table snapshots.

use std::time::Duration;

use benchwatch_types::{DashboardRow, DashboardSnapshot, Status, StatusRecord, TableSnapshot};
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};

use crate::aggregator::Aggregator;

pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// Rows, counters, and totals for one frame.
#[must_use]
pub fn derive(table: &TableSnapshot) -> DashboardSnapshot {
    let mut records: Vec<&StatusRecord> = table.records.iter().collect();
    records.sort_by_key(|record| record.first_seen());
    let rows: Vec<DashboardRow> = records.into_iter().map(DashboardRow::from).collect();

    let mut snapshot = DashboardSnapshot {
        total: rows.len(),
        generation: table.generation,
        discovery_complete: table.discovery_complete,
        ..DashboardSnapshot::default()
    };

    for row in &rows {
        match row.status {
            Status::Pending => snapshot.pending += 1,
            Status::Running => snapshot.running += 1,
            Status::Complete => snapshot.complete += 1,
            Status::Failed => snapshot.failed += 1,
        }
        if let Some(duration) = row.last_duration {
            snapshot.total_duration += duration;
        }
        if let Some(rate) = row.rate {
            snapshot.total_rate += rate;
        }
    }

    if table.discovery_complete && snapshot.total > 0 {
        snapshot.percent_complete = snapshot.finished() as f64 / snapshot.total as f64 * 100.0;
    }

    snapshot.rows = rows;
    snapshot
}

/// Produces fresh snapshots on every table change or tick, whichever comes
/// first.
pub struct DashboardFeed {
    aggregator: Aggregator,
    changes: watch::Receiver<u64>,
    tick: Interval,
    changes_open: bool,
}

impl DashboardFeed {
    #[must_use]
    pub fn new(aggregator: Aggregator, tick: Duration) -> Self {
        let changes = aggregator.subscribe();
        let mut tick = tokio::time::interval(tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            aggregator,
            changes,
            tick,
            changes_open: true,
        }
    }

    /// Wait for the next push notification or tick and return a snapshot.
    pub async fn next(&mut self) -> DashboardSnapshot {
        tokio::select! {
            changed = self.changes.changed(), if self.changes_open => {
                if changed.is_err() {
                    self.changes_open = false;
                }
            }
            _ = self.tick.tick() => {}
        }
        self.current()
    }

    #[must_use]
    pub fn current(&self) -> DashboardSnapshot {
        derive(&self.aggregator.snapshot())
    }
}
