use rulegate_core::checker::CheckerConfig;
use rulegate_core::rules::RuleKind;
use rulegate_core::session::ScanConfig;
use rulegate_core::shortcircuit::ShortcircuitConfig;
use serde::{Deserialize, Serialize};

/// Everything a host configures: scan options, shortcircuit scores, the
/// rule table and the external checkers.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RulegateConfig {
    /// Per-scan options. `deadline_ms` bounds every scan, including the
    /// final wait on outstanding async checks.
    pub scan: ScanConfig,
    /// Scores forced onto `spam`/`ham` shortcircuits.
    pub shortcircuit: ShortcircuitConfig,
    /// The rule table. Order matters only between rules of equal priority.
    pub rules: Vec<RuleConfig>,
    /// External checkers, each bound to one `async` rule.
    pub checkers: Vec<CheckerConfig>,
}

/// One rule declaration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RuleConfig {
    pub name: String,
    /// Lower runs earlier. Ignored for `spam`/`ham` shortcircuit rules,
    /// which always run at -950.
    pub priority: i32,
    pub score: f64,
    /// One of `off`, `on`, `spam`, `ham` (case-insensitive).
    pub shortcircuit: String,
    pub kind: RuleKind,
    /// Tuning flags such as `noautolearn` or `nice`. Words the scheduler
    /// does not know are left to the rule engine.
    pub tflags: Vec<String>,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            priority: 0,
            score: 1.0,
            shortcircuit: "off".into(),
            kind: RuleKind::Sync,
            tflags: Vec::new(),
        }
    }
}

impl RuleConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}
