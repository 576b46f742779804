use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Priority forced onto rules whose shortcircuit action is `spam` or `ham`,
/// so they run ahead of ordinary scoring rules.
pub const SHORTCIRCUIT_PRIORITY: i32 = -950;

/// What a rule does to the scan when it fires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShortcircuitAction {
    #[default]
    Off,
    /// Stop the scan, classify by the sign of the rule's own score.
    On,
    /// Stop the scan as spam with the configured spam override score.
    Spam,
    /// Stop the scan as ham with the configured ham override score.
    Ham,
}

impl ShortcircuitAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShortcircuitAction::Off => "off",
            ShortcircuitAction::On => "on",
            ShortcircuitAction::Spam => "spam",
            ShortcircuitAction::Ham => "ham",
        }
    }

    /// `spam` and `ham` pin the rule to run first and keep it away from the
    /// learner.
    pub fn forces_priority(&self) -> bool {
        matches!(self, ShortcircuitAction::Spam | ShortcircuitAction::Ham)
    }
}

impl fmt::Display for ShortcircuitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown shortcircuit action '{0}' (expected off, on, spam or ham)")]
pub struct UnknownShortcircuitAction(pub String);

impl FromStr for ShortcircuitAction {
    type Err = UnknownShortcircuitAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "off" => Ok(ShortcircuitAction::Off),
            "on" => Ok(ShortcircuitAction::On),
            "spam" => Ok(ShortcircuitAction::Spam),
            "ham" => Ok(ShortcircuitAction::Ham),
            _ => Err(UnknownShortcircuitAction(s.to_string())),
        }
    }
}

/// How the scheduler runs a rule's test.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Evaluated in-line by the rule-matching engine.
    #[default]
    Sync,
    /// Delegated to an external checker; launch returns immediately.
    Async,
}

/// Tuning flags derived from configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TuningFlags {
    /// Excluded from adaptive learning.
    pub noautolearn: bool,
    /// Rule indicates legitimate mail.
    pub nice: bool,
}

impl TuningFlags {
    /// Parse the `tflags` words this core cares about; unknown words belong
    /// to the rule engine and are ignored here.
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut flags = TuningFlags::default();
        for word in words {
            match word.as_ref().trim() {
                "noautolearn" => flags.noautolearn = true,
                "nice" => flags.nice = true,
                _ => {}
            }
        }
        flags
    }

    fn union(self, other: TuningFlags) -> TuningFlags {
        TuningFlags {
            noautolearn: self.noautolearn || other.noautolearn,
            nice: self.nice || other.nice,
        }
    }
}

/// Static configuration for one rule. Built at configuration load and shared
/// read-only by every scan.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleDescriptor {
    name: String,
    declared_priority: i32,
    score: f64,
    shortcircuit: ShortcircuitAction,
    kind: RuleKind,
    declared_flags: TuningFlags,
}

impl RuleDescriptor {
    pub fn new(name: impl Into<String>, score: f64) -> Self {
        Self {
            name: name.into(),
            declared_priority: 0,
            score,
            shortcircuit: ShortcircuitAction::Off,
            kind: RuleKind::Sync,
            declared_flags: TuningFlags::default(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.declared_priority = priority;
        self
    }

    pub fn with_shortcircuit(mut self, action: ShortcircuitAction) -> Self {
        self.shortcircuit = action;
        self
    }

    pub fn with_kind(mut self, kind: RuleKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_flags(mut self, flags: TuningFlags) -> Self {
        self.declared_flags = flags;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    pub fn shortcircuit(&self) -> ShortcircuitAction {
        self.shortcircuit
    }

    /// Effective priority. `spam`/`ham` shortcircuit rules always report
    /// [`SHORTCIRCUIT_PRIORITY`] whatever was declared.
    pub fn priority(&self) -> i32 {
        if self.shortcircuit.forces_priority() {
            SHORTCIRCUIT_PRIORITY
        } else {
            self.declared_priority
        }
    }

    pub fn declared_priority(&self) -> i32 {
        self.declared_priority
    }

    /// Effective flags: declared flags plus the ones implied by the
    /// shortcircuit action.
    pub fn flags(&self) -> TuningFlags {
        let forced = match self.shortcircuit {
            ShortcircuitAction::Spam => TuningFlags {
                noautolearn: true,
                nice: false,
            },
            ShortcircuitAction::Ham => TuningFlags {
                noautolearn: true,
                nice: true,
            },
            ShortcircuitAction::Off | ShortcircuitAction::On => TuningFlags::default(),
        };
        self.declared_flags.union(forced)
    }
}
