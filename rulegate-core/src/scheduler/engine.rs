use std::fmt::Debug;

use crate::error::RuleError;
use crate::rules::RuleDescriptor;
use crate::session::Message;

/// What the rule-matching engine observed for one rule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RuleEvaluation {
    Fired { score: f64 },
    Missed,
}

impl RuleEvaluation {
    /// Fired with the rule's configured score.
    pub fn fired_with_default(rule: &RuleDescriptor) -> Self {
        RuleEvaluation::Fired {
            score: rule.score(),
        }
    }
}

/// The rule-matching engine. Decides whether a synchronous rule fires for a
/// message; how it matches is its own business.
pub trait RuleEngine: Send + Sync + Debug {
    fn evaluate_rule(
        &self,
        rule: &RuleDescriptor,
        message: &Message,
    ) -> Result<RuleEvaluation, RuleError>;
}
