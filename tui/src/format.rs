use std::time::Duration;

/// Seconds with millisecond precision, or `-` when the target never ran.
pub(crate) fn format_seconds(value: Option<Duration>) -> String {
    match value {
        Some(d) => format!("{:.3}", d.as_secs_f64()),
        None => "-".to_string(),
    }
}

pub(crate) fn format_rate(value: Option<f64>) -> String {
    let Some(rate) = value else {
        return "-".to_string();
    };
    if rate >= 1_000_000.0 {
        format!("{:.1}M", rate / 1_000_000.0)
    } else if rate >= 1000.0 {
        format!("{:.1}k", rate / 1000.0)
    } else {
        format!("{rate:.2}")
    }
}

/// Elapsed wall time as `1m05s` or `4.2s`.
pub(crate) fn format_elapsed(value: Duration) -> String {
    let secs = value.as_secs();
    if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", value.as_secs_f64())
    }
}
