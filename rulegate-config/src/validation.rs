use std::collections::HashSet;

use rulegate_core::checker::UnsafeHelperArgs;
use rulegate_core::rules::{RuleKind, RuleSetError, ShortcircuitAction, UnknownShortcircuitAction};
use thiserror::Error;

use crate::models::RulegateConfig;

/// Malformed option values. Raised at load time only; a config that
/// validates never produces one of these during a scan.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("rule #{index} has no name")]
    MissingRuleName { index: usize },
    #[error("duplicate rule name: {0}")]
    DuplicateRule(String),
    #[error("rule {rule}: {source}")]
    UnknownShortcircuit {
        rule: String,
        #[source]
        source: UnknownShortcircuitAction,
    },
    #[error("rule {rule}: score must be finite, got {score}")]
    InvalidScore { rule: String, score: f64 },
    #[error("shortcircuit {field} must be finite, got {value}")]
    InvalidShortcircuitScore { field: &'static str, value: f64 },
    #[error("async rule {0} has no checker")]
    MissingChecker(String),
    #[error("checker {checker} targets unknown rule {rule}")]
    UnknownCheckerRule { checker: String, rule: String },
    #[error("checker {checker} targets rule {rule}, which is not an async rule")]
    SyncCheckerRule { checker: String, rule: String },
    #[error("rule {0} has more than one checker")]
    DuplicateChecker(String),
    #[error("checker {0} is enabled but has no helper_path")]
    MissingHelperPath(String),
    #[error("checker {checker}: {source}")]
    UnsafeHelperArgs {
        checker: String,
        #[source]
        source: UnsafeHelperArgs,
    },
    #[error("checker {checker}: whitelist_factor must be finite and non-negative, got {value}")]
    InvalidWhitelistFactor { checker: String, value: f64 },
}

impl From<RuleSetError> for ConfigError {
    fn from(err: RuleSetError) -> Self {
        match err {
            RuleSetError::Duplicate(name) => ConfigError::DuplicateRule(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Check every option value. Returns the non-fatal findings on success.
pub fn validate(config: &RulegateConfig) -> Result<ConfigWarnings, ConfigError> {
    let mut warnings = ConfigWarnings::default();

    for (field, value) in [
        ("spam_score", config.shortcircuit.spam_score),
        ("ham_score", config.shortcircuit.ham_score),
    ] {
        if !value.is_finite() {
            return Err(ConfigError::InvalidShortcircuitScore { field, value });
        }
    }

    let mut names = HashSet::new();
    for (index, rule) in config.rules.iter().enumerate() {
        if rule.name.trim().is_empty() {
            return Err(ConfigError::MissingRuleName { index });
        }
        if !names.insert(rule.name.as_str()) {
            return Err(ConfigError::DuplicateRule(rule.name.clone()));
        }
        if !rule.score.is_finite() {
            return Err(ConfigError::InvalidScore {
                rule: rule.name.clone(),
                score: rule.score,
            });
        }

        let action = rule.shortcircuit.parse::<ShortcircuitAction>().map_err(|source| {
            ConfigError::UnknownShortcircuit {
                rule: rule.name.clone(),
                source,
            }
        })?;
        if action.forces_priority() && rule.priority != 0 {
            warnings.push_with_hint(
                format!(
                    "rule {} declares priority {} but shortcircuits as {}",
                    rule.name, rule.priority, action
                ),
                "spam and ham shortcircuit rules always run at priority -950",
            );
        }
    }

    let mut covered = HashSet::new();
    for checker in &config.checkers {
        let Some(rule) = config.rules.iter().find(|rule| rule.name == checker.rule) else {
            return Err(ConfigError::UnknownCheckerRule {
                checker: checker.name.clone(),
                rule: checker.rule.clone(),
            });
        };
        if rule.kind != RuleKind::Async {
            return Err(ConfigError::SyncCheckerRule {
                checker: checker.name.clone(),
                rule: checker.rule.clone(),
            });
        }
        if !covered.insert(checker.rule.as_str()) {
            return Err(ConfigError::DuplicateChecker(checker.rule.clone()));
        }

        checker
            .helper_argv()
            .map_err(|source| ConfigError::UnsafeHelperArgs {
                checker: checker.name.clone(),
                source,
            })?;

        if !checker.whitelist_factor.is_finite() || checker.whitelist_factor < 0.0 {
            return Err(ConfigError::InvalidWhitelistFactor {
                checker: checker.name.clone(),
                value: checker.whitelist_factor,
            });
        }

        if !checker.enabled {
            warnings.push(format!(
                "checker {} is disabled; rule {} never hits",
                checker.name, checker.rule
            ));
            continue;
        }

        if checker.helper_path.is_none() {
            return Err(ConfigError::MissingHelperPath(checker.name.clone()));
        }

        if checker.timeout_ms > config.scan.deadline_ms {
            warnings.push_with_hint(
                format!(
                    "checker {} timeout_ms ({}) exceeds the scan deadline ({})",
                    checker.name, checker.timeout_ms, config.scan.deadline_ms
                ),
                "the helper timeout is clamped to whatever is left of the deadline",
            );
        }

        if checker.min_reports == 0 {
            warnings.push(format!(
                "checker {} has min_reports = 0; every lookup hits unless whitelisted",
                checker.name
            ));
        }
    }

    for rule in &config.rules {
        if rule.kind == RuleKind::Async && !covered.contains(rule.name.as_str()) {
            return Err(ConfigError::MissingChecker(rule.name.clone()));
        }
    }

    if config.scan.local_only && !config.checkers.is_empty() {
        warnings.push("local_only is set; external checkers never run");
    }

    Ok(warnings)
}
