//! Core engine for benchwatch: discovery, change watching, scheduling,
//! execution, and aggregation.
//!
//! This crate has no terminal or rendering dependencies. Reporters consume
//! [`DashboardSnapshot`]s produced by [`DashboardFeed`].

mod error;

pub mod aggregator;
pub mod dashboard;
pub mod debounce;
pub mod discovery;
pub mod executor;
pub mod process;
pub mod scheduler;
pub mod session;
pub mod watcher;

pub use aggregator::Aggregator;
pub use benchwatch_types::{
    ChangeEvent, ChangeKind, DashboardRow, DashboardSnapshot, ExecutionOutcome, FinishedRun, Status,
    StatusRecord, TableSnapshot, Target, TransitionError,
};
pub use dashboard::{DashboardFeed, derive};
pub use debounce::{Debouncer, RawChange};
pub use discovery::{Discovery, DiscoveryDiagnostic, DiscoveryWalk, TargetMatcher, resolve_roots};
pub use error::{SetupError, WatchError};
pub use executor::{CommandExecutor, CommandSpec, ExecFut, Executor};
pub use scheduler::{Intake, Scheduler, SchedulerSettings, Submission};
pub use session::{RunMode, RunSummary, Session, SessionSettings};
pub use watcher::{ChangeWatcher, WatchSettings, WatcherStats};
