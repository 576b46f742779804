//! Shortcircuit policy: decides whether a fired rule ends the scan.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rules::{RuleDescriptor, ShortcircuitAction};

/// Summary tag: `"<rule> (<classification>)"` or `"no"`.
pub const TAG_SC: &str = "SC";
/// Triggering rule name or `"none"`.
pub const TAG_SCRULE: &str = "SCRULE";
/// Classification token or `"no"`.
pub const TAG_SCTYPE: &str = "SCTYPE";

/// Override scores substituted by `spam`/`ham` shortcircuits.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShortcircuitConfig {
    /// Score used when a `spam` shortcircuit fires.
    pub spam_score: f64,
    /// Score used when a `ham` shortcircuit fires.
    pub ham_score: f64,
}

impl Default for ShortcircuitConfig {
    fn default() -> Self {
        Self {
            spam_score: 100.0,
            ham_score: -100.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Spam,
    Ham,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Spam => "spam",
            Classification::Ham => "ham",
        }
    }

    fn from_score(score: f64) -> Self {
        if score < 0.0 {
            Classification::Ham
        } else {
            Classification::Spam
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the effective score of a shortcircuit came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreSource {
    /// The rule's own observed score, unmodified (`on`).
    Default,
    /// One of the configured override scores (`spam`/`ham`).
    Override,
}

/// Recorded on the session when a shortcircuiting rule fires. Immutable once
/// recorded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShortcircuitOutcome {
    pub rule: String,
    pub classification: Classification,
    pub score_source: ScoreSource,
    pub effective_score: f64,
}

impl ShortcircuitOutcome {
    pub fn summary(&self) -> String {
        format!("{} ({})", self.rule, self.classification)
    }
}

/// Resolve one of the shortcircuit tags from the recorded outcome. Returns
/// `None` for tag names this module does not own.
pub fn tag_value(outcome: Option<&ShortcircuitOutcome>, tag: &str) -> Option<String> {
    let value = match (tag, outcome) {
        (TAG_SC, Some(outcome)) => outcome.summary(),
        (TAG_SC, None) => "no".to_string(),
        (TAG_SCRULE, Some(outcome)) => outcome.rule.clone(),
        (TAG_SCRULE, None) => "none".to_string(),
        (TAG_SCTYPE, Some(outcome)) => outcome.classification.as_str().to_string(),
        (TAG_SCTYPE, None) => "no".to_string(),
        _ => return None,
    };
    Some(value)
}

/// Maps a fired rule to a shortcircuit decision.
#[derive(Clone, Debug, Default)]
pub struct ShortcircuitPolicy {
    config: ShortcircuitConfig,
}

impl ShortcircuitPolicy {
    pub fn new(config: ShortcircuitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ShortcircuitConfig {
        &self.config
    }

    pub fn decide(
        &self,
        rule: &RuleDescriptor,
        observed_score: f64,
    ) -> Option<ShortcircuitOutcome> {
        let (classification, score_source, effective_score) = match rule.shortcircuit() {
            ShortcircuitAction::Off => return None,
            ShortcircuitAction::On => (
                Classification::from_score(observed_score),
                ScoreSource::Default,
                observed_score,
            ),
            ShortcircuitAction::Spam => (
                Classification::Spam,
                ScoreSource::Override,
                self.config.spam_score,
            ),
            ShortcircuitAction::Ham => (
                Classification::Ham,
                ScoreSource::Override,
                self.config.ham_score,
            ),
        };

        debug!(
            target: "scan::shortcircuit",
            rule = %rule.name(),
            action = %rule.shortcircuit(),
            %classification,
            effective_score,
            "shortcircuit decision"
        );

        Some(ShortcircuitOutcome {
            rule: rule.name().to_string(),
            classification,
            score_source,
            effective_score,
        })
    }
}
