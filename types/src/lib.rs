//! Core domain types for benchwatch.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! The engine, the reporters, and the CLI all speak these types.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod sanitize;
mod snapshot;

pub use sanitize::{diagnostic_headline, sanitize_terminal_text};
pub use snapshot::{DashboardRow, DashboardSnapshot, TableSnapshot};

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime};
use thiserror::Error;

// ============================================================================
// Target
// ============================================================================

/// One discoverable unit of benchmark work, identified by its file path.
///
/// Immutable once created. The path is unique within a run and is the key of
/// the run table; the display name is only used for presentation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    path: PathBuf,
    display_name: String,
}

impl Target {
    /// Create a target named after its file name.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let display_name = file_name_of(&path);
        Self { path, display_name }
    }

    /// Create a target named by its path relative to `root`.
    ///
    /// Falls back to the file name when `path` is not under `root`.
    #[must_use]
    pub fn under_root(path: impl Into<PathBuf>, root: &Path) -> Self {
        let path = path.into();
        let display_name = path
            .strip_prefix(root)
            .ok()
            .filter(|rel| !rel.as_os_str().is_empty())
            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|| file_name_of(&path));
        Self { path, display_name }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Directory the external command runs in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}

// ============================================================================
// Change events
// ============================================================================

/// Kind of filesystem change that triggered a re-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Write,
    Rename,
    Remove,
}

impl ChangeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Write => "write",
            Self::Rename => "rename",
            Self::Remove => "remove",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One debounced filesystem change. Consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub observed_at: SystemTime,
}

impl ChangeEvent {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            observed_at: SystemTime::now(),
        }
    }
}

// ============================================================================
// Execution outcome
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Succeeded,
    Failed(String),
}

/// Result of one execution attempt of one target.
///
/// Only failures carry a diagnostic; the constructors make any other shape
/// unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    target: Target,
    duration: Duration,
    verdict: Verdict,
}

impl ExecutionOutcome {
    #[must_use]
    pub fn success(target: Target, duration: Duration) -> Self {
        Self {
            target,
            duration,
            verdict: Verdict::Succeeded,
        }
    }

    /// A failed execution. An empty diagnostic is replaced by a generic one so
    /// failures are never silent.
    #[must_use]
    pub fn failure(target: Target, duration: Duration, diagnostic: impl Into<String>) -> Self {
        let diagnostic = diagnostic.into();
        let diagnostic = if diagnostic.trim().is_empty() {
            "execution failed without output".to_string()
        } else {
            diagnostic
        };
        Self {
            target,
            duration,
            verdict: Verdict::Failed(diagnostic),
        }
    }

    #[must_use]
    pub fn target(&self) -> &Target {
        &self.target
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(self.verdict, Verdict::Succeeded)
    }

    #[must_use]
    pub fn diagnostic(&self) -> Option<&str> {
        match &self.verdict {
            Verdict::Succeeded => None,
            Verdict::Failed(diagnostic) => Some(diagnostic),
        }
    }
}

// ============================================================================
// Status state machine
// ============================================================================

/// Lifecycle state of one target within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Running,
    Complete,
    Failed,
}

impl Status {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Rejected status transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("target `{name}` is already running")]
    AlreadyRunning { name: String },
    #[error("target `{name}` cannot finish while {status}")]
    NotRunning { name: String, status: Status },
    #[error("no status record for {}", path.display())]
    Unknown { path: PathBuf },
}

/// Finished executions a record keeps for reporters that emit one line per
/// execution.
pub const RECENT_RUNS: usize = 8;

/// One finished execution of a target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinishedRun {
    /// 1-based execution number for this target.
    pub run: u32,
    pub status: Status,
    pub duration: Duration,
    pub diagnostic: Option<String>,
}

impl FinishedRun {
    #[must_use]
    pub fn rate(&self) -> Option<f64> {
        ops_per_second(self.duration)
    }
}

/// `1e9 / duration_nanos`, undefined for a zero duration.
fn ops_per_second(duration: Duration) -> Option<f64> {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        return None;
    }
    Some(1e9 / nanos as f64)
}

/// Per-target record owned by the run table.
///
/// Transitions: `Pending -> Running -> {Complete, Failed}`; a finished record
/// may re-enter `Running` for a new execution, appending to its history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRecord {
    name: String,
    path: PathBuf,
    status: Status,
    last_duration: Option<Duration>,
    history: Vec<Duration>,
    recent: VecDeque<FinishedRun>,
    runs: u32,
    last_diagnostic: Option<String>,
    first_seen: u64,
}

impl StatusRecord {
    /// A fresh `Pending` record. `first_seen` orders rows on the dashboard.
    #[must_use]
    pub fn new(target: &Target, first_seen: u64) -> Self {
        Self {
            name: target.display_name().to_string(),
            path: target.path().to_path_buf(),
            status: Status::Pending,
            last_duration: None,
            history: Vec::new(),
            recent: VecDeque::with_capacity(RECENT_RUNS),
            runs: 0,
            last_diagnostic: None,
            first_seen,
        }
    }

    pub fn begin(&mut self) -> Result<(), TransitionError> {
        match self.status {
            Status::Running => Err(TransitionError::AlreadyRunning {
                name: self.name.clone(),
            }),
            Status::Pending | Status::Complete | Status::Failed => {
                self.status = Status::Running;
                Ok(())
            }
        }
    }

    pub fn finish(&mut self, outcome: &ExecutionOutcome) -> Result<(), TransitionError> {
        if self.status != Status::Running {
            return Err(TransitionError::NotRunning {
                name: self.name.clone(),
                status: self.status,
            });
        }

        let duration = outcome.duration();
        self.last_duration = Some(duration);
        self.history.push(duration);
        self.runs = self.runs.saturating_add(1);

        if outcome.succeeded() {
            self.status = Status::Complete;
            self.last_diagnostic = None;
        } else {
            self.status = Status::Failed;
            self.last_diagnostic = outcome.diagnostic().map(str::to_owned);
        }

        if self.recent.len() == RECENT_RUNS {
            self.recent.pop_front();
        }
        self.recent.push_back(FinishedRun {
            run: self.runs,
            status: self.status,
            duration,
            diagnostic: self.last_diagnostic.clone(),
        });
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    #[must_use]
    pub fn last_duration(&self) -> Option<Duration> {
        self.last_duration
    }

    #[must_use]
    pub fn history(&self) -> &[Duration] {
        &self.history
    }

    /// The last [`RECENT_RUNS`] finished executions, oldest first.
    #[must_use]
    pub fn recent_runs(&self) -> &VecDeque<FinishedRun> {
        &self.recent
    }

    #[must_use]
    pub fn runs(&self) -> u32 {
        self.runs
    }

    #[must_use]
    pub fn last_diagnostic(&self) -> Option<&str> {
        self.last_diagnostic.as_deref()
    }

    #[must_use]
    pub fn first_seen(&self) -> u64 {
        self.first_seen
    }

    /// Operations-per-second estimate: `1e9 / duration_nanos`.
    ///
    /// Undefined (`None`) until a non-zero duration has been recorded.
    #[must_use]
    pub fn derived_rate(&self) -> Option<f64> {
        ops_per_second(self.last_duration?)
    }
}

// ============================================================================
// Reporter selection
// ============================================================================

/// Terminal dashboard appearance switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UiOptions {
    pub ascii_only: bool,
    pub high_contrast: bool,
    pub reduced_motion: bool,
}

/// Which renderer consumes dashboard snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReporterKind {
    #[default]
    Terminal,
    Json,
    Csv,
}

impl ReporterKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Terminal => "terminal",
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl fmt::Display for ReporterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown reporter `{0}` (expected terminal, json, or csv)")]
pub struct UnknownReporter(pub String);

impl FromStr for ReporterKind {
    type Err = UnknownReporter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "terminal" | "tui" => Ok(Self::Terminal),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            _ => Err(UnknownReporter(s.to_string())),
        }
    }
}
