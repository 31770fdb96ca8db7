//! Cleaning of captured process output before it reaches a terminal or a
//! machine-readable report.
//!
//! Benchmark commands write whatever they like to stdout/stderr, including
//! color codes and cursor movement. Diagnostics are shown inside a ratatui
//! table and embedded in JSON/CSV lines, so escape sequences and stray control
//! characters are removed first.

use std::borrow::Cow;

const ESC: char = '\x1b';
const BEL: char = '\x07';
const C1_CSI: char = '\u{009b}';

#[derive(Clone, Copy, PartialEq, Eq)]
enum Scan {
    Text,
    /// Just saw ESC.
    Escape,
    /// ESC followed by a charset/attribute selector that takes one more char.
    EscapeArg,
    Csi,
    /// OSC/DCS/PM/APC payload, ended by BEL (OSC only) or ESC `\`.
    Payload { bel_ends: bool },
    /// Saw ESC inside a payload, expecting `\`.
    PayloadEscape { bel_ends: bool },
}

/// Strip ANSI escape sequences and control characters other than newline,
/// tab, and carriage return.
///
/// Returns `Cow::Borrowed` when nothing needed removing.
///
/// ```
/// use benchwatch_types::sanitize_terminal_text;
///
/// assert_eq!(sanitize_terminal_text("ok\x1b[32m PASS\x1b[0m"), "ok PASS");
/// ```
#[must_use]
pub fn sanitize_terminal_text(input: &str) -> Cow<'_, str> {
    if !input.chars().any(is_unsafe) {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut state = Scan::Text;

    for c in input.chars() {
        state = match state {
            Scan::Text => match c {
                ESC => Scan::Escape,
                C1_CSI => Scan::Csi,
                c if is_unsafe(c) => Scan::Text,
                c => {
                    out.push(c);
                    Scan::Text
                }
            },
            Scan::Escape => match c {
                '[' => Scan::Csi,
                ']' => Scan::Payload { bel_ends: true },
                'P' | '^' | '_' => Scan::Payload { bel_ends: false },
                '(' | ')' | '*' | '+' | '#' | ' ' => Scan::EscapeArg,
                ESC => Scan::Escape,
                // Single-char commands (ESC 7, ESC c, ...) and unknown
                // introducers are dropped along with the ESC.
                _ => Scan::Text,
            },
            Scan::EscapeArg => Scan::Text,
            Scan::Csi => match c {
                '\x20'..='\x3f' => Scan::Csi,
                '\x40'..='\x7e' => Scan::Text,
                // Malformed sequence: resume as text with this char.
                c if is_unsafe(c) => Scan::Text,
                c => {
                    out.push(c);
                    Scan::Text
                }
            },
            Scan::Payload { bel_ends } => match c {
                BEL if bel_ends => Scan::Text,
                ESC => Scan::PayloadEscape { bel_ends },
                _ => Scan::Payload { bel_ends },
            },
            Scan::PayloadEscape { bel_ends } => match c {
                '\\' => Scan::Text,
                ESC => Scan::PayloadEscape { bel_ends },
                _ => Scan::Payload { bel_ends },
            },
        };
    }

    Cow::Owned(out)
}

fn is_unsafe(c: char) -> bool {
    match c {
        '\n' | '\t' | '\r' => false,
        '\0'..='\x1f' | '\x7f' | '\u{0080}'..='\u{009f}' => true,
        _ => false,
    }
}

/// Single-line summary of a diagnostic for a table cell.
///
/// Picks the last non-blank line (where `go test` and most runners put the
/// verdict), sanitizes it, and truncates to `max_chars` with an ellipsis.
#[must_use]
pub fn diagnostic_headline(diagnostic: &str, max_chars: usize) -> String {
    let clean = sanitize_terminal_text(diagnostic);
    let line = clean
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| !line.is_empty())
        .unwrap_or("");

    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let mut cut: String = line.chars().take(max_chars - 1).collect();
    cut.push('…');
    cut
}
