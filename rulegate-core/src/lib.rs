//! # Rulegate Core
//!
//! Rule scheduling for message classification: rules are evaluated in
//! priority order against a single per-scan deadline, any rule can be
//! configured to shortcircuit the scan, and reputation-style lookups run
//! through out-of-process helpers that are polled rather than awaited.
//!
//! ## Architecture
//!
//! - [`deadline`]: the per-scan wall-clock budget
//! - [`rules`]: immutable rule descriptors and the priority-ordered [`rules::RuleSet`]
//! - [`session`]: per-scan state, report tags and the final [`session::ScanReport`]
//! - [`shortcircuit`]: the policy mapping a fired rule to a shortcircuit outcome
//! - [`scheduler`]: the [`scheduler::RuleScheduler`] and the rule-engine seam
//! - [`checker`]: external checkers, their helper processes and async handles
//!
//! ## Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use rulegate_core::rules::{RuleDescriptor, RuleSet, ShortcircuitAction};
//! use rulegate_core::scheduler::{RuleEngine, RuleEvaluation, RuleScheduler};
//! use rulegate_core::session::{Message, ScanConfig};
//! use rulegate_core::shortcircuit::ShortcircuitPolicy;
//!
//! #[derive(Debug)]
//! struct Blocklist;
//!
//! impl RuleEngine for Blocklist {
//!     fn evaluate_rule(
//!         &self,
//!         rule: &RuleDescriptor,
//!         _message: &Message,
//!     ) -> Result<RuleEvaluation, rulegate_core::error::RuleError> {
//!         Ok(RuleEvaluation::fired_with_default(rule))
//!     }
//! }
//!
//! async fn classify(body: &[u8]) -> f64 {
//!     let rules = RuleSet::new(vec![
//!         RuleDescriptor::new("SENDER_BLOCKED", 1.0).with_shortcircuit(ShortcircuitAction::Spam),
//!     ])
//!     .expect("unique rule names");
//!
//!     let scheduler = RuleScheduler::new(
//!         Arc::new(rules),
//!         Arc::new(Blocklist),
//!         Arc::new(HashMap::new()),
//!         ShortcircuitPolicy::default(),
//!     );
//!     let report = scheduler.scan(&ScanConfig::default(), &Message::new(body)).await;
//!     report.score
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod checker;
pub mod deadline;
pub mod error;
pub mod rules;
pub mod scheduler;
pub mod session;
pub mod shortcircuit;

pub use checker::{CheckerConfig, ExternalChecker};
pub use deadline::Deadline;
pub use error::{CheckerError, RuleError};
pub use rules::{RuleDescriptor, RuleKind, RuleSet, ShortcircuitAction};
pub use scheduler::{CheckerRegistry, RuleEngine, RuleEvaluation, RuleScheduler};
pub use session::{Message, ScanConfig, ScanReport, ScanSession};
pub use shortcircuit::{ShortcircuitConfig, ShortcircuitOutcome, ShortcircuitPolicy};
