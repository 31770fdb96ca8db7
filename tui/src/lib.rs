//! Dashboard rendering and reporters for benchwatch.

mod format;
mod input;
mod reporter;
mod theme;

pub use input::{InputAction, InputPump, action_for, handle_events};
pub use reporter::{CsvReporter, JsonReporter, Reporter, TerminalReporter};
pub use theme::{Glyphs, Palette, glyphs, palette, spinner_frame, styles};

use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table},
};

use benchwatch_engine::{RunMode, RunSummary};
use benchwatch_types::{
    DashboardRow, DashboardSnapshot, UiOptions, diagnostic_headline, sanitize_terminal_text,
};

use crate::format::{format_elapsed, format_rate, format_seconds};

const HEADLINE_CHARS: usize = 120;

/// Per-frame presentation state that is not part of the run table.
#[derive(Debug, Clone)]
pub struct DashboardView {
    pub options: UiOptions,
    pub mode: RunMode,
    /// Frame counter driving the spinner.
    pub tick: usize,
    /// Set once the run is over.
    pub summary: Option<RunSummary>,
}

impl DashboardView {
    #[must_use]
    pub fn new(options: UiOptions, mode: RunMode) -> Self {
        Self {
            options,
            mode,
            tick: 0,
            summary: None,
        }
    }
}

/// Main draw function
pub fn draw(frame: &mut Frame, snapshot: &DashboardSnapshot, view: &DashboardView) {
    let palette = palette(view.options);
    let glyphs = glyphs(view.options);
    let bg_block = Block::default().style(Style::default().bg(palette.bg_dark));
    frame.render_widget(bg_block, frame.area());

    let [header, table, gauge, footer] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(3),
        Constraint::Length(1),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    draw_header(frame, snapshot, view, header, &palette, &glyphs);
    draw_table(frame, snapshot, table, &palette, &glyphs);
    draw_gauge(frame, snapshot, gauge, &palette);
    draw_footer(frame, snapshot, view, footer, &palette, &glyphs);
}

fn draw_header(
    frame: &mut Frame,
    snapshot: &DashboardSnapshot,
    view: &DashboardView,
    area: Rect,
    palette: &Palette,
    glyphs: &Glyphs,
) {
    let mode = match view.mode {
        RunMode::Batch => "batch",
        RunMode::Watch => "watch",
    };
    let activity = if snapshot.running > 0 {
        spinner_frame(view.tick, view.options)
    } else if view.mode == RunMode::Watch {
        glyphs.watching
    } else {
        " "
    };
    let sep = Span::styled(format!(" {} ", glyphs.separator), styles::key_hint(palette));

    let mut spans = vec![
        Span::raw(" "),
        Span::styled("benchwatch", styles::title(palette)),
        sep.clone(),
        Span::styled(mode, Style::default().fg(palette.text_secondary)),
        sep.clone(),
        Span::styled(activity, Style::default().fg(palette.warning)),
        Span::raw(" "),
        Span::styled(
            format!("{}/{} done", snapshot.finished(), snapshot.total),
            Style::default().fg(palette.text_primary),
        ),
    ];
    if snapshot.running > 0 {
        spans.push(sep.clone());
        spans.push(Span::styled(
            format!("{} running", snapshot.running),
            Style::default().fg(palette.warning),
        ));
    }
    if snapshot.failed > 0 {
        spans.push(sep);
        spans.push(Span::styled(
            format!("{} failed", snapshot.failed),
            Style::default()
                .fg(palette.error)
                .add_modifier(Modifier::BOLD),
        ));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_table(
    frame: &mut Frame,
    snapshot: &DashboardSnapshot,
    area: Rect,
    palette: &Palette,
    glyphs: &Glyphs,
) {
    let header = Row::new(
        ["Name", "Status", "Duration (s)", "Ops/sec", "Runs", "Last error"]
            .into_iter()
            .map(Cell::from),
    )
    .style(styles::table_header(palette));

    let rows = snapshot.rows.iter().map(|row| table_row(row, palette, glyphs));

    let widths = [
        Constraint::Percentage(30),
        Constraint::Length(11),
        Constraint::Length(12),
        Constraint::Length(9),
        Constraint::Length(5),
        Constraint::Min(10),
    ];

    let table = Table::new(rows, widths)
        .header(header)
        .column_spacing(1)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(styles::border(palette))
                .title(Span::styled(" Targets ", styles::title(palette))),
        );
    frame.render_widget(table, area);
}

fn table_row<'a>(row: &'a DashboardRow, palette: &Palette, glyphs: &Glyphs) -> Row<'a> {
    let status_style = Style::default().fg(palette.status(row.status));
    let error = row
        .diagnostic
        .as_deref()
        .map(|diag| diagnostic_headline(diag, HEADLINE_CHARS))
        .unwrap_or_default();

    Row::new(vec![
        Cell::from(sanitize_terminal_text(&row.name).into_owned())
            .style(Style::default().fg(palette.text_primary)),
        Cell::from(format!("{} {}", glyphs.status(row.status), row.status.label()))
            .style(status_style),
        Cell::from(format_seconds(row.last_duration)),
        Cell::from(format_rate(row.rate)),
        Cell::from(row.runs.to_string()),
        Cell::from(error).style(Style::default().fg(palette.error)),
    ])
}

fn draw_gauge(frame: &mut Frame, snapshot: &DashboardSnapshot, area: Rect, palette: &Palette) {
    let label = if snapshot.discovery_complete {
        format!(
            "{:.0}% ({}/{})",
            snapshot.percent_complete,
            snapshot.finished(),
            snapshot.total
        )
    } else {
        format!("discovering… {} found", snapshot.total)
    };
    let ratio = (snapshot.percent_complete / 100.0).clamp(0.0, 1.0);
    let gauge = Gauge::default()
        .gauge_style(styles::gauge(palette))
        .ratio(ratio)
        .label(label);
    frame.render_widget(gauge, area);
}

fn draw_footer(
    frame: &mut Frame,
    snapshot: &DashboardSnapshot,
    view: &DashboardView,
    area: Rect,
    palette: &Palette,
    glyphs: &Glyphs,
) {
    let sep = Span::styled(format!(" {} ", glyphs.separator), styles::key_hint(palette));
    let mut spans = vec![
        Span::raw(" "),
        Span::styled(
            format!("Total {}s", format_seconds(Some(snapshot.total_duration))),
            Style::default().fg(palette.text_secondary),
        ),
        sep.clone(),
        Span::styled(
            format!("{} ops/s", format_rate(Some(snapshot.total_rate))),
            Style::default().fg(palette.text_secondary),
        ),
        sep,
    ];

    if let Some(summary) = &view.summary {
        let color = if summary.failed > 0 || summary.pending > 0 {
            palette.error
        } else {
            palette.success
        };
        spans.push(Span::styled(
            format!(
                "Finished in {}: {} passed, {} failed, {} not run",
                format_elapsed(summary.duration),
                summary.passed,
                summary.failed,
                summary.pending
            ),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ));
    } else {
        spans.push(Span::styled("q", styles::key_highlight(palette)));
        spans.push(Span::styled(" quit", styles::key_hint(palette)));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// Plain-text results table printed after the dashboard is torn down.
#[must_use]
pub fn plain_report(snapshot: &DashboardSnapshot, summary: &RunSummary) -> String {
    let name_width = snapshot
        .rows
        .iter()
        .map(|row| row.name.chars().count())
        .max()
        .unwrap_or(0)
        .max(4);

    let mut out = format!(
        "{:<name_width$}  {:<8}  {:>12}  {:>9}  {:>4}\n",
        "Name", "Status", "Duration (s)", "Ops/sec", "Runs"
    );
    for row in &snapshot.rows {
        out.push_str(&format!(
            "{:<name_width$}  {:<8}  {:>12}  {:>9}  {:>4}\n",
            sanitize_terminal_text(&row.name),
            row.status.label(),
            format_seconds(row.last_duration),
            format_rate(row.rate),
            row.runs,
        ));
        if let Some(diag) = &row.diagnostic {
            out.push_str(&format!("    {}\n", diagnostic_headline(diag, HEADLINE_CHARS)));
        }
    }
    out.push_str(&format!(
        "\n{} targets: {} passed, {} failed, {} not run in {} (aggregate {}s)\n",
        summary.total,
        summary.passed,
        summary.failed,
        summary.pending,
        format_elapsed(summary.duration),
        format_seconds(Some(snapshot.total_duration)),
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchwatch_types::Status;
    use ratatui::{Terminal, backend::TestBackend, buffer::Buffer};
    use std::path::PathBuf;
    use std::time::Duration;

    fn row(name: &str, status: Status, ms: Option<u64>, diagnostic: Option<&str>) -> DashboardRow {
        let last_duration = ms.map(Duration::from_millis);
        DashboardRow {
            name: name.to_string(),
            path: PathBuf::from(format!("/bench/{name}")),
            status,
            last_duration,
            rate: last_duration.map(|d| 1.0 / d.as_secs_f64()),
            runs: u32::from(ms.is_some()),
            diagnostic: diagnostic.map(str::to_owned),
            recent_runs: Vec::new(),
        }
    }

    fn snapshot() -> DashboardSnapshot {
        DashboardSnapshot {
            rows: vec![
                row("sort_test.go", Status::Complete, Some(500), None),
                row(
                    "hash_test.go",
                    Status::Failed,
                    Some(250),
                    Some("exit code 1\n\n--- FAIL: BenchmarkHash\nFAIL"),
                ),
                row("tree_test.go", Status::Running, None, None),
                row("heap_test.go", Status::Pending, None, None),
            ],
            total: 4,
            pending: 1,
            running: 1,
            complete: 1,
            failed: 1,
            percent_complete: 50.0,
            total_duration: Duration::from_millis(750),
            total_rate: 6.0,
            generation: 9,
            discovery_complete: true,
        }
    }

    fn buffer_text(buffer: &Buffer) -> String {
        let width = buffer.area.width as usize;
        buffer
            .content()
            .chunks(width)
            .map(|line| line.iter().map(ratatui::buffer::Cell::symbol).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render(snapshot: &DashboardSnapshot, view: &DashboardView) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 14)).unwrap();
        terminal.draw(|frame| draw(frame, snapshot, view)).unwrap();
        buffer_text(terminal.backend().buffer())
    }

    #[test]
    fn renders_rows_and_counters() {
        let view = DashboardView::new(UiOptions::default(), RunMode::Batch);
        let text = render(&snapshot(), &view);

        assert!(text.contains("benchwatch"));
        assert!(text.contains("2/4 done"));
        assert!(text.contains("1 failed"));
        assert!(text.contains("sort_test.go"));
        assert!(text.contains("COMPLETE"));
        assert!(text.contains("0.500"));
        assert!(text.contains("FAILED"));
        // Headline is the last non-blank diagnostic line.
        assert!(text.contains("FAIL"));
        assert!(text.contains("50% (2/4)"));
        assert!(text.contains("Total 0.750s"));
    }

    #[test]
    fn discovery_in_progress_label() {
        let mut snap = snapshot();
        snap.discovery_complete = false;
        snap.percent_complete = 0.0;
        let view = DashboardView::new(UiOptions::default(), RunMode::Watch);
        let text = render(&snap, &view);
        assert!(text.contains("discovering… 4 found"));
        assert!(text.contains("watch"));
    }

    #[test]
    fn summary_replaces_key_hints() {
        let snap = snapshot();
        let mut view = DashboardView::new(UiOptions::default(), RunMode::Batch);
        assert!(render(&snap, &view).contains("q quit"));

        view.summary = Some(RunSummary {
            total: 4,
            passed: 1,
            failed: 1,
            pending: 2,
            duration: Duration::from_secs(2),
        });
        let text = render(&snap, &view);
        assert!(text.contains("1 passed, 1 failed, 2 not run"));
        assert!(!text.contains("q quit"));
    }

    #[test]
    fn ascii_mode_draws_ascii_status_glyphs() {
        let options = UiOptions {
            ascii_only: true,
            ..UiOptions::default()
        };
        let text = render(&snapshot(), &DashboardView::new(options, RunMode::Batch));
        assert!(text.contains("OK COMPLETE"));
        assert!(text.contains("X FAILED"));
        assert!(!text.contains('✓'));
    }

    #[test]
    fn control_sequences_in_names_are_stripped() {
        let mut snap = snapshot();
        snap.rows[0].name = "evil\x1b[2Jname_test.go".to_string();
        let text = render(&snap, &DashboardView::new(UiOptions::default(), RunMode::Batch));
        assert!(!text.contains('\x1b'));
    }

    #[test]
    fn tiny_terminal_does_not_panic() {
        let mut terminal = Terminal::new(TestBackend::new(10, 3)).unwrap();
        let view = DashboardView::new(UiOptions::default(), RunMode::Batch);
        terminal.draw(|frame| draw(frame, &snapshot(), &view)).unwrap();
    }

    #[test]
    fn plain_report_lists_every_row() {
        let snap = snapshot();
        let summary = RunSummary {
            total: 4,
            passed: 1,
            failed: 1,
            pending: 2,
            duration: Duration::from_millis(1500),
        };
        let text = plain_report(&snap, &summary);
        assert_eq!(text.lines().filter(|l| l.contains("_test.go")).count(), 4);
        assert!(text.contains("    FAIL"));
        assert!(text.contains("4 targets: 1 passed, 1 failed, 2 not run in 1.5s"));
    }
}
