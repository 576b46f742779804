//! Static rule configuration shared by every scan.

mod descriptor;

pub use descriptor::{
    RuleDescriptor, RuleKind, SHORTCIRCUIT_PRIORITY, ShortcircuitAction, TuningFlags,
    UnknownShortcircuitAction,
};

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleSetError {
    #[error("duplicate rule name: {0}")]
    Duplicate(String),
}

/// Immutable, priority-ordered collection of rules.
///
/// Rules are sorted ascending by effective priority; ties keep declaration
/// order.
#[derive(Clone, Default)]
pub struct RuleSet {
    rules: Vec<RuleDescriptor>,
    index: HashMap<String, usize>,
}

impl RuleSet {
    pub fn new(rules: Vec<RuleDescriptor>) -> Result<Self, RuleSetError> {
        let mut rules = rules;
        // `sort_by_key` is stable, which gives declaration order on ties.
        rules.sort_by_key(|rule| rule.priority());

        let mut index = HashMap::with_capacity(rules.len());
        for (position, rule) in rules.iter().enumerate() {
            if index.insert(rule.name().to_string(), position).is_some() {
                return Err(RuleSetError::Duplicate(rule.name().to_string()));
            }
        }

        Ok(Self { rules, index })
    }

    pub fn get(&self, name: &str) -> Option<&RuleDescriptor> {
        self.index.get(name).map(|&position| &self.rules[position])
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuleDescriptor> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleSet")
            .field("rule_count", &self.rules.len())
            .field(
                "first",
                &self.rules.first().map(|rule| (rule.name(), rule.priority())),
            )
            .finish()
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a RuleDescriptor;
    type IntoIter = std::slice::Iter<'a, RuleDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(set: &RuleSet) -> Vec<&str> {
        set.iter().map(|rule| rule.name()).collect()
    }

    #[test]
    fn orders_by_priority_then_declaration() {
        let set = RuleSet::new(vec![
            RuleDescriptor::new("LATE", 1.0).with_priority(10),
            RuleDescriptor::new("A", 1.0),
            RuleDescriptor::new("EARLY", 1.0).with_priority(-10),
            RuleDescriptor::new("B", 1.0),
            RuleDescriptor::new("FORCED", 1.0)
                .with_priority(1000)
                .with_shortcircuit(ShortcircuitAction::Ham),
        ])
        .expect("rule set");

        assert_eq!(names(&set), vec!["FORCED", "EARLY", "A", "B", "LATE"]);
        assert_eq!(set.get("B").map(|rule| rule.priority()), Some(0));
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = RuleSet::new(vec![
            RuleDescriptor::new("DUP", 1.0),
            RuleDescriptor::new("DUP", 2.0),
        ])
        .expect_err("duplicate should fail");
        assert_eq!(err, RuleSetError::Duplicate("DUP".into()));
    }
}
