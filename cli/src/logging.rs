use std::{
    fs::{self, OpenOptions},
    io,
    path::PathBuf,
    sync::Mutex,
};

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use benchwatch_config::BenchConfig;
use benchwatch_types::ReporterKind;

/// Install the global subscriber.
///
/// The terminal dashboard owns stdout and stderr, so its logs go to a file.
/// Line-oriented reporters own stdout only, so their logs go to stderr.
pub fn init_tracing(reporter: ReporterKind) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    if reporter != ReporterKind::Terminal {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(io::stderr))
            .with(env_filter)
            .init();
        return;
    }

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // If we can't open a log file, prefer "no logs" over corrupting the dashboard
    // by writing to stdout/stderr.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.benchwatch/logs/benchwatch.log
    if let Some(config_path) = BenchConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("benchwatch.log"));
    }

    // Fallback: ./.benchwatch/logs/benchwatch.log
    candidates.push(PathBuf::from(".benchwatch").join("logs").join("benchwatch.log"));

    candidates
}
