use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::response::Thresholds;

static SAFE_HELPER_ARGS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9 =,._/-]*$").expect("static helper argument pattern")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("helper arguments contain characters outside [A-Za-z0-9 =,._/-]: {0:?}")]
pub struct UnsafeHelperArgs(pub String);

/// Settings for one external checker. One instance per reputation-style
/// provider; the provider-specific bits are all data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    /// Short provider name used in logs.
    pub name: String,
    /// Rule this checker implements. Must be an `async` rule.
    pub rule: String,
    pub enabled: bool,
    /// Helper executable. A checker without one never runs.
    pub helper_path: Option<PathBuf>,
    /// Extra helper arguments, whitespace separated. Restricted to
    /// `[A-Za-z0-9 =,._/-]`.
    pub helper_args: String,
    /// Appended after `helper_args`; the lookup verb of the helper.
    pub subcommand: Option<String>,
    /// Upper bound for one helper invocation (ms). Also clamped to the
    /// remaining scan deadline.
    pub timeout_ms: u64,
    /// Aggregate report count at or above which the rule hits.
    pub min_reports: u64,
    /// Whitelist count at or above which whitelist suppression is considered.
    pub min_whitelist: u64,
    /// Whitelisted when `whitelist_count >= report_count * whitelist_factor`.
    pub whitelist_factor: f64,
    /// Run the lookup in a detached task and poll for it instead of blocking
    /// the scheduler.
    pub fork: bool,
    /// Exit code that is expected from the helper and not worth a warning.
    pub benign_exit_code: Option<i32>,
    /// Time granted to a helper between the soft and the hard stop (ms).
    pub grace_period_ms: u64,
    /// Output line prefixes that mean the helper itself crashed.
    pub error_markers: Vec<String>,
    /// Tag receiving the human-readable verdict summary.
    pub summary_tag: String,
    /// Bodies larger than this are not sent to the helper.
    pub max_body_bytes: usize,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            name: "reputation".to_string(),
            rule: "REPUTATION_CHECK".to_string(),
            enabled: true,
            helper_path: None,
            helper_args: String::new(),
            subcommand: Some("check".to_string()),
            timeout_ms: 5_000,
            min_reports: 5,
            min_whitelist: 10,
            whitelist_factor: 0.2,
            fork: false,
            benign_exit_code: Some(1),
            grace_period_ms: 500,
            error_markers: vec!["Traceback".to_string()],
            summary_tag: "REPUTATION".to_string(),
            max_body_bytes: 512_000,
        }
    }
}

impl CheckerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            min_reports: self.min_reports,
            min_whitelist: self.min_whitelist,
            whitelist_factor: self.whitelist_factor,
        }
    }

    /// Reputation lookup through `helper_path` with the stock thresholds.
    pub fn reputation(helper_path: impl Into<PathBuf>) -> Self {
        Self {
            helper_path: Some(helper_path.into()),
            ..Self::default()
        }
    }

    /// Validated, whitespace-split helper arguments followed by the
    /// subcommand.
    pub fn helper_argv(&self) -> Result<Vec<String>, UnsafeHelperArgs> {
        if !SAFE_HELPER_ARGS.is_match(&self.helper_args) {
            return Err(UnsafeHelperArgs(self.helper_args.clone()));
        }
        let subcommand = self.subcommand.as_deref().unwrap_or_default();
        if !SAFE_HELPER_ARGS.is_match(subcommand) {
            return Err(UnsafeHelperArgs(subcommand.to_string()));
        }
        Ok(self
            .helper_args
            .split_whitespace()
            .chain(subcommand.split_whitespace())
            .map(str::to_string)
            .collect())
    }
}
