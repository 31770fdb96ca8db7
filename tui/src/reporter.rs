//! Snapshot consumers: the live terminal dashboard and the line-oriented
//! NDJSON and CSV reporters.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use ratatui::{Terminal, backend::Backend};
use serde::Serialize;

use benchwatch_engine::RunSummary;
use benchwatch_types::{
    DashboardRow, DashboardSnapshot, FinishedRun, Status, sanitize_terminal_text,
};

use crate::{DashboardView, draw};

/// Receives every dashboard snapshot of a run, then a final one.
pub trait Reporter {
    fn update(&mut self, snapshot: &DashboardSnapshot) -> Result<()>;

    /// Called exactly once with the snapshot taken after the pipeline has
    /// drained.
    fn finish(&mut self, snapshot: &DashboardSnapshot, summary: &RunSummary) -> Result<()>;
}

/// Live ratatui dashboard.
pub struct TerminalReporter<'a, B: Backend> {
    terminal: &'a mut Terminal<B>,
    view: DashboardView,
}

impl<'a, B> TerminalReporter<'a, B>
where
    B: Backend,
    B::Error: Send + Sync + 'static,
{
    pub fn new(terminal: &'a mut Terminal<B>, view: DashboardView) -> Self {
        Self { terminal, view }
    }

    fn render(&mut self, snapshot: &DashboardSnapshot) -> Result<()> {
        let view = &self.view;
        self.terminal.draw(|frame| draw(frame, snapshot, view))?;
        Ok(())
    }
}

impl<B> Reporter for TerminalReporter<'_, B>
where
    B: Backend,
    B::Error: Send + Sync + 'static,
{
    fn update(&mut self, snapshot: &DashboardSnapshot) -> Result<()> {
        self.view.tick = self.view.tick.wrapping_add(1);
        self.render(snapshot)
    }

    fn finish(&mut self, snapshot: &DashboardSnapshot, summary: &RunSummary) -> Result<()> {
        self.view.summary = Some(*summary);
        self.render(snapshot)
    }
}

/// Remembers the last finished run of each target that was written.
#[derive(Debug, Default)]
struct EmittedRuns {
    runs: HashMap<PathBuf, u32>,
}

impl EmittedRuns {
    /// Finished runs not written yet, oldest first within each target.
    fn fresh<'s>(
        &mut self,
        snapshot: &'s DashboardSnapshot,
    ) -> Vec<(&'s DashboardRow, &'s FinishedRun)> {
        let mut fresh = Vec::new();
        for row in &snapshot.rows {
            let seen = self.runs.entry(row.path.clone()).or_insert(0);
            let unseen: Vec<&FinishedRun> =
                row.recent_runs.iter().filter(|run| run.run > *seen).collect();
            let Some(latest) = unseen.last() else {
                continue;
            };
            if let Some(oldest) = unseen.first()
                && oldest.run > *seen + 1
            {
                tracing::warn!(
                    name = %row.name,
                    missed = oldest.run - *seen - 1,
                    "runs finished faster than they could be reported"
                );
            }
            *seen = latest.run;
            fresh.extend(unseen.into_iter().map(|run| (row, run)));
        }
        fresh
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum JsonLine<'a> {
    Result {
        timestamp: String,
        name: &'a str,
        path: &'a Path,
        status: Status,
        duration_ms: f64,
        rate: Option<f64>,
        run: u32,
        diagnostic: Option<Cow<'a, str>>,
    },
    Summary {
        timestamp: String,
        total: usize,
        passed: usize,
        failed: usize,
        pending: usize,
        elapsed_ms: f64,
        total_duration_ms: f64,
        total_rate: f64,
    },
}

/// Newline-delimited JSON: one `result` object per finished execution and a
/// closing `summary` object.
pub struct JsonReporter<W: Write> {
    out: W,
    emitted: EmittedRuns,
}

impl<W: Write> JsonReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            emitted: EmittedRuns::default(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, line: &JsonLine<'_>) -> Result<()> {
        serde_json::to_writer(&mut self.out, line).context("failed to encode JSON line")?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn write_fresh(&mut self, snapshot: &DashboardSnapshot) -> Result<()> {
        let fresh = self.emitted.fresh(snapshot);
        for (row, run) in fresh {
            self.write_line(&JsonLine::Result {
                timestamp: timestamp(),
                name: &row.name,
                path: &row.path,
                status: run.status,
                duration_ms: run.duration.as_secs_f64() * 1000.0,
                rate: run.rate(),
                run: run.run,
                diagnostic: run.diagnostic.as_deref().map(sanitize_terminal_text),
            })?;
        }
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> Reporter for JsonReporter<W> {
    fn update(&mut self, snapshot: &DashboardSnapshot) -> Result<()> {
        self.write_fresh(snapshot)
    }

    fn finish(&mut self, snapshot: &DashboardSnapshot, summary: &RunSummary) -> Result<()> {
        self.write_fresh(snapshot)?;
        self.write_line(&JsonLine::Summary {
            timestamp: timestamp(),
            total: summary.total,
            passed: summary.passed,
            failed: summary.failed,
            pending: summary.pending,
            elapsed_ms: summary.duration.as_secs_f64() * 1000.0,
            total_duration_ms: snapshot.total_duration.as_secs_f64() * 1000.0,
            total_rate: snapshot.total_rate,
        })?;
        self.out.flush()?;
        Ok(())
    }
}

const CSV_HEADER: &str = "timestamp,name,path,status,duration_ms,ops_per_sec,run,diagnostic";

/// RFC 4180 CSV, one row per finished execution. Diagnostics are stripped
/// of terminal escape sequences since the output often lands on a terminal.
pub struct CsvReporter<W: Write> {
    out: W,
    emitted: EmittedRuns,
    header_written: bool,
}

impl<W: Write> CsvReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            emitted: EmittedRuns::default(),
            header_written: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_fresh(&mut self, snapshot: &DashboardSnapshot) -> Result<()> {
        if !self.header_written {
            writeln!(self.out, "{CSV_HEADER}")?;
            self.header_written = true;
        }
        let fresh = self.emitted.fresh(snapshot);
        for (row, run) in fresh {
            let fields = [
                timestamp(),
                row.name.clone(),
                row.path.display().to_string(),
                run.status.label().to_ascii_lowercase(),
                format!("{:.3}", run.duration.as_secs_f64() * 1000.0),
                run.rate().map(|r| format!("{r:.4}")).unwrap_or_default(),
                run.run.to_string(),
                run.diagnostic
                    .as_deref()
                    .map(|d| sanitize_terminal_text(d).into_owned())
                    .unwrap_or_default(),
            ];
            let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
            writeln!(self.out, "{}", line.join(","))?;
        }
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> Reporter for CsvReporter<W> {
    fn update(&mut self, snapshot: &DashboardSnapshot) -> Result<()> {
        self.write_fresh(snapshot)
    }

    fn finish(&mut self, snapshot: &DashboardSnapshot, summary: &RunSummary) -> Result<()> {
        self.write_fresh(snapshot)?;
        tracing::info!(
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            pending = summary.pending,
            "run finished"
        );
        Ok(())
    }
}

/// Quote a field when it contains a delimiter, a quote, or a line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
