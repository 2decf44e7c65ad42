//! Values a renderer needs from a transition, computed without touching
//! any presentation layer.

use chrono::{DateTime, NaiveDateTime};
use sts_core_types::TransitionRecord;

use crate::stats::DurationStats;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransitionStatus {
    InProgress,
    Failed,
    Succeeded,
}

impl TransitionStatus {
    pub fn of(record: &TransitionRecord) -> Self {
        if record.failed {
            TransitionStatus::Failed
        } else if record.in_progress() {
            TransitionStatus::InProgress
        } else {
            TransitionStatus::Succeeded
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionStatus::InProgress => "in-progress",
            TransitionStatus::Failed => "failed",
            TransitionStatus::Succeeded => "succeeded",
        }
    }
}

/// Duration bar of one transition row.
#[derive(Clone, Debug, PartialEq)]
pub struct BarView {
    /// Width as a fraction of the longest transition; `None` draws no bar.
    pub ratio: Option<f64>,
    /// Human duration; absent for zero-length transitions.
    pub label: Option<String>,
    pub status: TransitionStatus,
}

impl BarView {
    pub fn for_record(record: &TransitionRecord, stats: &DurationStats) -> Self {
        let drawn = record.duration > 0.0;
        Self {
            ratio: stats.percentage(record).filter(|_| drawn),
            label: drawn.then(|| {
                record
                    .natural_duration
                    .clone()
                    .unwrap_or_else(|| natural_duration(record.duration))
            }),
            status: TransitionStatus::of(record),
        }
    }
}

const UNITS: [(&str, u64); 6] = [
    ("year", 365 * 86_400),
    ("month", 30 * 86_400),
    ("week", 7 * 86_400),
    ("day", 86_400),
    ("hour", 3_600),
    ("minute", 60),
];

fn plural(count: u64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit}")
    } else {
        format!("{count} {unit}s")
    }
}

/// Render a millisecond duration the way a person would say it:
/// `250 milliseconds`, `42 seconds`, `2 hours, 5 minutes`.
pub fn natural_duration(millis: f64) -> String {
    let millis = if millis.is_finite() { millis.max(0.0) } else { 0.0 };
    if millis < 1000.0 {
        return plural(millis.round() as u64, "millisecond");
    }
    let seconds = (millis / 1000.0).round() as u64;
    if seconds < 60 {
        return plural(seconds, "second");
    }

    let mut parts = Vec::with_capacity(2);
    let mut rest = seconds;
    for (index, (unit, size)) in UNITS.iter().enumerate() {
        let count = rest / size;
        if count == 0 {
            continue;
        }
        parts.push(plural(count, unit));
        rest %= size;
        // Only the largest unit and the one right below it.
        if let Some((next_unit, next_size)) = UNITS.get(index + 1) {
            let next = rest / next_size;
            if next > 0 {
                parts.push(plural(next, next_unit));
            }
        }
        break;
    }
    parts.join(", ")
}

/// Format a server timestamp as `M/D/YYYY @ h:mm:ss am`. Unparseable input
/// is returned unchanged.
pub fn timestamp_label(raw: &str) -> String {
    const FORMAT: &str = "%-m/%-d/%Y @ %-I:%M:%S %P";
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.format(FORMAT).to_string();
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|pattern| NaiveDateTime::parse_from_str(raw, pattern).ok())
        .map(|parsed| parsed.format(FORMAT).to_string())
        .unwrap_or_else(|| raw.to_string())
}
