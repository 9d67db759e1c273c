//! Broker-format preprocessing applied before the CSV reader runs.
//!
//! Some broker exports wrap every row in one pair of quotation marks, and
//! most Windows-originated files carry a UTF-8 byte-order mark. All of that
//! is normalized here so the parser only ever sees plain delimited text;
//! per-broker quirks never leak into the row parser.

use serde::{Deserialize, Serialize};

/// Pre-processing tag for a broker's CSV dialect. `Auto` sniffs the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerFormat {
    #[default]
    Auto,
    /// Plain RFC-4180-ish CSV.
    Standard,
    /// Every line wrapped in a single pair of quotes (Revolut-style exports).
    FullyQuoted,
}

/// Normalize raw CSV text: strip a leading BOM, then apply the dialect's
/// line-level rewrite. The result is fed to `csv::Reader`.
pub fn normalize_csv(raw: &str, format: BrokerFormat) -> String {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let format = match format {
        BrokerFormat::Auto => detect(raw),
        other => other,
    };
    match format {
        BrokerFormat::FullyQuoted => raw
            .lines()
            .map(unwrap_fully_quoted_line)
            .collect::<Vec<_>>()
            .join("\n"),
        _ => raw.to_string(),
    }
}

/// A file is fully-quoted when every non-empty line starts and ends with a
/// quote and contains no bare delimiter outside the outer pair.
fn detect(raw: &str) -> BrokerFormat {
    let mut saw_line = false;
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        saw_line = true;
        let trimmed = line.trim();
        if !(trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2) {
            return BrokerFormat::Standard;
        }
        let inner = &trimmed[1..trimmed.len() - 1];
        if inner.contains('"') {
            // Interior quotes mean ordinary quoted fields, not a wrapped row.
            return BrokerFormat::Standard;
        }
    }
    if saw_line {
        BrokerFormat::FullyQuoted
    } else {
        BrokerFormat::Standard
    }
}

fn unwrap_fully_quoted_line(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}
