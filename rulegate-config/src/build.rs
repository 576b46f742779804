use std::sync::Arc;

use rulegate_core::checker::ExternalChecker;
use rulegate_core::rules::{RuleDescriptor, RuleSet, ShortcircuitAction, TuningFlags};
use rulegate_core::scheduler::{CheckerRegistry, RuleEngine, RuleScheduler};
use rulegate_core::session::ScanConfig;
use rulegate_core::shortcircuit::ShortcircuitPolicy;
use tracing::{info, warn};

use crate::models::{RuleConfig, RulegateConfig};
use crate::validation::{self, ConfigError, ConfigWarnings};

/// Validated configuration, ready to drive scans. Everything in here is
/// immutable and shared by every scan.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub rules: Arc<RuleSet>,
    pub checkers: Arc<CheckerRegistry>,
    pub policy: ShortcircuitPolicy,
    pub scan: ScanConfig,
    pub warnings: ConfigWarnings,
}

impl LoadedConfig {
    /// A scheduler over this configuration using `engine` for synchronous
    /// rules.
    pub fn scheduler(&self, engine: Arc<dyn RuleEngine>) -> RuleScheduler {
        RuleScheduler::new(
            Arc::clone(&self.rules),
            engine,
            Arc::clone(&self.checkers),
            self.policy.clone(),
        )
    }
}

impl RulegateConfig {
    /// Validate and turn the declarations into a sorted rule set and a
    /// checker registry.
    pub fn build(&self) -> Result<LoadedConfig, ConfigError> {
        let warnings = validation::validate(self)?;
        for warning in &warnings.items {
            match &warning.hint {
                Some(hint) => warn!(hint = %hint, "{}", warning.message),
                None => warn!("{}", warning.message),
            }
        }

        let descriptors = self
            .rules
            .iter()
            .map(descriptor)
            .collect::<Result<Vec<_>, _>>()?;
        let rules = RuleSet::new(descriptors)?;

        let mut checkers = CheckerRegistry::new();
        for config in &self.checkers {
            let checker = ExternalChecker::new(config.clone()).map_err(|source| {
                ConfigError::UnsafeHelperArgs {
                    checker: config.name.clone(),
                    source,
                }
            })?;
            checkers.insert(config.rule.clone(), Arc::new(checker));
        }

        info!(
            rules = rules.len(),
            checkers = checkers.len(),
            deadline_ms = self.scan.deadline_ms,
            local_only = self.scan.local_only,
            "rule configuration loaded"
        );

        Ok(LoadedConfig {
            rules: Arc::new(rules),
            checkers: Arc::new(checkers),
            policy: ShortcircuitPolicy::new(self.shortcircuit),
            scan: self.scan,
            warnings,
        })
    }
}

fn descriptor(rule: &RuleConfig) -> Result<RuleDescriptor, ConfigError> {
    let action = rule
        .shortcircuit
        .parse::<ShortcircuitAction>()
        .map_err(|source| ConfigError::UnknownShortcircuit {
            rule: rule.name.clone(),
            source,
        })?;

    Ok(RuleDescriptor::new(rule.name.clone(), rule.score)
        .with_priority(rule.priority)
        .with_shortcircuit(action)
        .with_kind(rule.kind)
        .with_flags(TuningFlags::from_words(&rule.tflags)))
}

#[cfg(test)]
mod tests {
    use rulegate_core::checker::CheckerConfig;
    use rulegate_core::rules::{RuleKind, SHORTCIRCUIT_PRIORITY};

    use super::*;

    #[test]
    fn build_orders_rules_and_applies_forced_flags() {
        let config = RulegateConfig {
            rules: vec![
                RuleConfig {
                    priority: 500,
                    ..RuleConfig::new("LATE")
                },
                RuleConfig {
                    priority: 100,
                    shortcircuit: "ham".into(),
                    ..RuleConfig::new("WELCOMELIST")
                },
                RuleConfig {
                    kind: RuleKind::Async,
                    tflags: vec!["net".into(), "nice".into()],
                    ..RuleConfig::new("REPUTATION_CHECK")
                },
            ],
            checkers: vec![CheckerConfig::reputation("/usr/bin/rep-helper")],
            ..RulegateConfig::default()
        };

        let loaded = config.build().expect("valid config");
        let order: Vec<_> = loaded.rules.iter().map(|rule| rule.name()).collect();
        assert_eq!(order, vec!["WELCOMELIST", "REPUTATION_CHECK", "LATE"]);

        let welcomelist = loaded.rules.get("WELCOMELIST").expect("rule");
        assert_eq!(welcomelist.priority(), SHORTCIRCUIT_PRIORITY);
        assert!(welcomelist.flags().noautolearn);
        assert!(welcomelist.flags().nice);

        let reputation = loaded.rules.get("REPUTATION_CHECK").expect("rule");
        assert!(reputation.flags().nice);
        assert!(!reputation.flags().noautolearn);
        assert!(loaded.checkers.contains_key("REPUTATION_CHECK"));
    }

    #[test]
    fn build_surfaces_validation_errors() {
        let config = RulegateConfig {
            rules: vec![RuleConfig {
                kind: RuleKind::Async,
                ..RuleConfig::new("ORPHAN")
            }],
            ..RulegateConfig::default()
        };
        assert!(matches!(config.build(), Err(ConfigError::MissingChecker(_))));
    }
}
