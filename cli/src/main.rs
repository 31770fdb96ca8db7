//! benchwatch CLI - binary entry point and terminal session management.
//!
//! # Architecture
//!
//! The CLI bridges [`benchwatch_engine`] (the pipeline) and [`benchwatch_tui`]
//! (reporters), providing RAII-based terminal management with guaranteed cleanup.
//!
//! ```text
//! main() -> load config -> Session -> pipeline task
//!                                        |
//!                 DashboardFeed -> Reporter::update ... Reporter::finish
//! ```
//!
//! # Event Loop
//!
//! The reporter loop wakes on every run-table change or on a 100ms tick:
//!
//! 1. Wait for the next dashboard snapshot (or pipeline completion)
//! 2. Hand the snapshot to the reporter
//! 3. Drain keyboard input (terminal reporter only); `q` requests shutdown
//! 4. When the pipeline task ends, render the final snapshot once

mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;
use std::{
    io::{self, Stdout},
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use benchwatch_config::BenchConfig;
use benchwatch_engine::{
    ChangeWatcher, DashboardFeed, RunMode, RunSummary, Session, SetupError, WatchSettings,
    dashboard::DEFAULT_TICK, resolve_roots,
};
use benchwatch_tui::{
    CsvReporter, DashboardView, InputAction, InputPump, JsonReporter, Reporter, TerminalReporter,
    handle_events, plain_report,
};
use benchwatch_types::ReporterKind;

/// Exit code for configuration, root, and watcher failures.
const EXIT_SETUP: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "benchwatch", version, about = "Run benchmark targets and watch them for changes")]
struct Args {
    /// Keep running and re-run targets whose files change.
    #[arg(short, long)]
    watch: bool,

    /// Only run targets whose path relative to its root matches this regex
    /// (for example `^sort/`). The regex is also passed to the runner as
    /// `{filter}`.
    #[arg(short, long, value_name = "REGEX")]
    filter: Option<String>,

    /// Number of targets executed concurrently.
    #[arg(short, long, value_name = "N", value_parser = parse_parallelism)]
    parallel: Option<usize>,

    /// Output format: terminal, json, or csv.
    #[arg(long, value_name = "KIND")]
    reporter: Option<ReporterKind>,

    /// Per-target timeout in seconds.
    #[arg(long, value_name = "SECONDS", value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// Config file (default: ~/.benchwatch/config.toml).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directories to scan (default: ./benchmarks).
    #[arg(value_name = "DIRS")]
    dirs: Vec<PathBuf>,
}

impl Args {
    fn mode(&self) -> RunMode {
        if self.watch {
            RunMode::Watch
        } else {
            RunMode::Batch
        }
    }

    /// File config with command-line values layered on top.
    fn resolve_config(&self) -> Result<BenchConfig, SetupError> {
        let mut config = match &self.config {
            Some(path) => BenchConfig::load_from(path)?,
            None => BenchConfig::load()?.unwrap_or_default(),
        };
        if let Some(filter) = &self.filter {
            config.run.filter.clone_from(filter);
        }
        if let Some(parallel) = self.parallel {
            config.run.parallelism = parallel;
        }
        if let Some(reporter) = self.reporter {
            config.run.reporter = reporter;
        }
        if let Some(timeout) = self.timeout {
            config.run.timeout_seconds = timeout;
        }
        Ok(config)
    }
}

fn parse_parallelism(raw: &str) -> Result<usize, String> {
    let value: usize = raw
        .parse()
        .map_err(|_| format!("`{raw}` is not a number"))?;
    if value == 0 {
        return Err("parallelism must be at least 1".to_string());
    }
    Ok(value)
}

/// RAII wrapper for terminal state with guaranteed cleanup on drop.
///
/// Raw mode and the alternate screen are restored on drop, so the terminal
/// remains usable even after panics or early returns.
struct TerminalSession {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalSession {
    fn new() -> Result<Self> {
        enable_raw_mode()?;

        let mut out = io::stdout();
        if let Err(err) = execute!(out, EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(err.into());
        }

        let terminal = match Terminal::new(CrosstermBackend::new(out)) {
            Ok(t) => t,
            Err(err) => {
                let _ = disable_raw_mode();
                let _ = execute!(io::stdout(), LeaveAlternateScreen);
                return Err(err.into());
            }
        };
        Ok(Self { terminal })
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match args.resolve_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err}");
            return ExitCode::from(EXIT_SETUP);
        }
    };
    logging::init_tracing(config.run.reporter);

    match run(&args, &config).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            tracing::error!("{err:#}");
            eprintln!("Error: {err:#}");
            ExitCode::from(EXIT_SETUP)
        }
    }
}

type Pipeline = JoinHandle<Result<RunSummary, SetupError>>;

async fn run(args: &Args, config: &BenchConfig) -> Result<u8> {
    let mode = args.mode();
    let roots = resolve_roots(&args.dirs, &config.discovery.default_root)?;
    tracing::info!(
        roots = ?roots,
        mode = ?mode,
        parallelism = config.run.parallelism,
        reporter = %config.run.reporter,
        "starting"
    );

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let session = Arc::new(Session::from_config(config, roots.clone(), shutdown.clone())?);
    let watcher = match mode {
        RunMode::Watch => Some(ChangeWatcher::start(
            &roots,
            WatchSettings::from_config(&config.watch),
            &shutdown,
        )?),
        RunMode::Batch => None,
    };

    let mut feed = DashboardFeed::new(session.aggregator().clone(), DEFAULT_TICK);
    let mut pipeline: Pipeline = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            match watcher {
                Some(watcher) => session.run_watch(watcher).await,
                None => session.run_batch().await,
            }
        })
    };

    let summary = match config.run.reporter {
        ReporterKind::Terminal => {
            let view = DashboardView::new(config.ui.options(), mode);
            let (snapshot, summary) = {
                let mut term = TerminalSession::new()?;
                let mut input = Some(InputPump::new());
                let mut reporter = TerminalReporter::new(&mut term.terminal, view);
                let result =
                    drive(&mut reporter, &mut feed, &mut pipeline, &mut input, &shutdown).await;
                if let Some(mut input) = input {
                    input.shutdown().await;
                }
                result?
            };
            print!("{}", plain_report(&snapshot, &summary));
            summary
        }
        ReporterKind::Json => {
            let mut reporter = JsonReporter::new(io::stdout());
            drive(&mut reporter, &mut feed, &mut pipeline, &mut None, &shutdown)
                .await?
                .1
        }
        ReporterKind::Csv => {
            let mut reporter = CsvReporter::new(io::stdout());
            drive(&mut reporter, &mut feed, &mut pipeline, &mut None, &shutdown)
                .await?
                .1
        }
    };

    tracing::info!(
        total = summary.total,
        passed = summary.passed,
        failed = summary.failed,
        pending = summary.pending,
        elapsed_ms = summary.duration.as_millis() as u64,
        "run finished"
    );
    Ok(u8::try_from(summary.exit_code(mode)).unwrap_or(1))
}

fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            () = shutdown.cancelled() => {}
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => tracing::info!("interrupt received, shutting down"),
                    Err(err) => tracing::warn!("failed to listen for interrupt: {err}"),
                }
                shutdown.cancel();
            }
        }
    });
}

/// Feed snapshots to `reporter` until the pipeline finishes, then render the
/// final snapshot once.
async fn drive(
    reporter: &mut dyn Reporter,
    feed: &mut DashboardFeed,
    pipeline: &mut Pipeline,
    input: &mut Option<InputPump>,
    shutdown: &CancellationToken,
) -> Result<(benchwatch_types::DashboardSnapshot, RunSummary)> {
    let summary = loop {
        tokio::select! {
            biased;
            joined = &mut *pipeline => {
                break joined.context("pipeline task panicked")??;
            }
            snapshot = feed.next() => {
                if let Err(err) = reporter.update(&snapshot) {
                    shutdown.cancel();
                    return Err(err);
                }
                if let Some(pump) = input.as_mut() {
                    match handle_events(pump) {
                        Ok(InputAction::Quit) => shutdown.cancel(),
                        Ok(InputAction::Continue) => {}
                        Err(err) => {
                            shutdown.cancel();
                            return Err(err);
                        }
                    }
                }
            }
        }
    };

    let snapshot = feed.current();
    reporter.finish(&snapshot, &summary)?;
    Ok((snapshot, summary))
}
