//! Helper response parsing and threshold aggregation.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CheckerError;

/// Aggregate report counts at or above this are treated as degenerate
/// (typically the hash of an empty body).
pub const REPORT_COUNT_CEILING: u64 = 1_000_000;
/// Aggregate whitelist counts at or above this are treated as degenerate.
pub const WHITELIST_COUNT_CEILING: u64 = 10_000;

// <token> <arbitrary> <report_count> <whitelist_count>, tab separated but
// tolerant of any whitespace.
static RESPONSE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\S+)\s+(.*?)\s+(\d+)\s+(\d+)\s*$").expect("static response line pattern")
});

/// Counts summed over every well-formed response line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerVerdict {
    pub report_count: u64,
    pub whitelist_count: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    pub min_reports: u64,
    pub min_whitelist: u64,
    pub whitelist_factor: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Decision {
    Hit,
    NoHit,
    Whitelisted,
    /// Counts beyond the guard rails; never a hit.
    Degenerate,
}

impl Decision {
    pub fn is_hit(&self) -> bool {
        matches!(self, Decision::Hit)
    }
}

impl CheckerVerdict {
    pub fn decide(&self, thresholds: &Thresholds) -> Decision {
        if self.report_count >= REPORT_COUNT_CEILING
            || self.whitelist_count >= WHITELIST_COUNT_CEILING
        {
            return Decision::Degenerate;
        }

        if self.whitelist_count >= thresholds.min_whitelist {
            let limit = self.report_count as f64 * thresholds.whitelist_factor;
            if self.whitelist_count as f64 >= limit {
                return Decision::Whitelisted;
            }
        }

        if self.report_count >= thresholds.min_reports {
            Decision::Hit
        } else {
            Decision::NoHit
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Reported {} times, whitelisted {} times.",
            self.report_count, self.whitelist_count
        )
    }
}

/// Sum the counts of every well-formed line. Malformed lines are logged and
/// skipped; a line starting with one of `error_markers` fails the whole
/// response.
pub fn parse_response<S>(
    lines: &[S],
    error_markers: &[String],
) -> Result<CheckerVerdict, CheckerError>
where
    S: AsRef<str>,
{
    let mut verdict = CheckerVerdict::default();

    for line in lines.iter().map(AsRef::as_ref) {
        if line.trim().is_empty() {
            continue;
        }

        if let Some(marker) = error_markers
            .iter()
            .find(|marker| !marker.is_empty() && line.starts_with(marker.as_str()))
        {
            return Err(CheckerError::HelperFailed(format!(
                "helper output starts with '{marker}'"
            )));
        }

        let Some(captures) = RESPONSE_LINE.captures(line) else {
            warn!(target: "scan::checker", line, "ignoring malformed response line");
            continue;
        };

        // The pattern only admits digits, so the only failure is overflow.
        let (Ok(reports), Ok(whitelisted)) =
            (captures[3].parse::<u64>(), captures[4].parse::<u64>())
        else {
            warn!(target: "scan::checker", line, "ignoring response line with out-of-range counts");
            continue;
        };

        verdict.report_count = verdict.report_count.saturating_add(reports);
        verdict.whitelist_count = verdict.whitelist_count.saturating_add(whitelisted);
    }

    Ok(verdict)
}
