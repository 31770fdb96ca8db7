//! Read-only views of the run table handed to reporters.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::{FinishedRun, Status, StatusRecord};

/// Immutable copy of every status record, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableSnapshot {
    pub records: Vec<StatusRecord>,
    /// Mutation counter of the table at the time of the copy.
    pub generation: u64,
    pub discovery_complete: bool,
}

impl TableSnapshot {
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One dashboard row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardRow {
    pub name: String,
    pub path: PathBuf,
    pub status: Status,
    #[serde(with = "duration_ms_opt")]
    pub last_duration: Option<Duration>,
    pub rate: Option<f64>,
    pub runs: u32,
    pub diagnostic: Option<String>,
    /// Latest finished executions, oldest first.
    #[serde(skip)]
    pub recent_runs: Vec<FinishedRun>,
}

impl From<&StatusRecord> for DashboardRow {
    fn from(record: &StatusRecord) -> Self {
        Self {
            name: record.name().to_string(),
            path: record.path().to_path_buf(),
            status: record.status(),
            last_duration: record.last_duration(),
            rate: record.derived_rate(),
            runs: record.runs(),
            diagnostic: record.last_diagnostic().map(str::to_owned),
            recent_runs: record.recent_runs().iter().cloned().collect(),
        }
    }
}

/// Everything a reporter needs to draw one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    pub rows: Vec<DashboardRow>,
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub complete: usize,
    pub failed: usize,
    /// 0 until discovery has finished, then `finished / total * 100`.
    pub percent_complete: f64,
    #[serde(with = "duration_ms")]
    pub total_duration: Duration,
    pub total_rate: f64,
    pub generation: u64,
    pub discovery_complete: bool,
}

impl DashboardSnapshot {
    /// Targets in a terminal state.
    #[must_use]
    pub fn finished(&self) -> usize {
        self.complete + self.failed
    }

    /// True once discovery is sealed and nothing is pending or running.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.discovery_complete && self.pending == 0 && self.running == 0
    }
}

/// Durations are reported as fractional milliseconds.
mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64() * 1000.0)
    }
}

mod duration_ms_opt {
    use serde::Serializer;
    use std::time::Duration;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_secs_f64() * 1000.0)),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExecutionOutcome, Target};

    #[test]
    fn row_copies_record_fields() {
        let target = Target::new("/b/fib_test.go");
        let mut record = StatusRecord::new(&target, 0);
        record.begin().unwrap();
        record
            .finish(&ExecutionOutcome::failure(
                target,
                Duration::from_millis(250),
                "exit code 1",
            ))
            .unwrap();

        let row = DashboardRow::from(&record);
        assert_eq!(row.name, "fib_test.go");
        assert_eq!(row.status, Status::Failed);
        assert_eq!(row.last_duration, Some(Duration::from_millis(250)));
        assert_eq!(row.runs, 1);
        assert_eq!(row.diagnostic.as_deref(), Some("exit code 1"));
        assert_eq!(row.recent_runs.len(), 1);
        assert_eq!(row.recent_runs[0].run, 1);
    }

    #[test]
    fn serializes_durations_as_millis() {
        let row = DashboardRow {
            name: "a".into(),
            path: PathBuf::from("/a"),
            status: Status::Complete,
            last_duration: Some(Duration::from_millis(1500)),
            rate: Some(0.5),
            runs: 1,
            diagnostic: None,
            recent_runs: Vec::new(),
        };
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["status"], "complete");
        assert_eq!(value["last_duration"], 1500.0);
        assert!(value["diagnostic"].is_null());
    }

    #[test]
    fn settled_requires_sealed_discovery() {
        let mut snap = DashboardSnapshot {
            total: 2,
            complete: 2,
            ..DashboardSnapshot::default()
        };
        assert!(!snap.is_settled());
        snap.discovery_complete = true;
        assert!(snap.is_settled());
        assert_eq!(snap.finished(), 2);
    }
}
