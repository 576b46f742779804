//! Priority-ordered rule evaluation with shortcircuit control.
//!
//! The scheduler visits rules in ascending priority, runs synchronous rules
//! through the [`RuleEngine`], launches external checkers, and consults the
//! [`ShortcircuitPolicy`] on every hit. The first shortcircuit stops the
//! pass and aborts every outstanding async check; otherwise outstanding
//! checks are drained before the scan finishes.

mod engine;

pub use engine::{RuleEngine, RuleEvaluation};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::checker::{AsyncCheckHandle, CheckOutcome, ExternalChecker, PollStatus};
use crate::rules::{RuleDescriptor, RuleKind, RuleSet};
use crate::session::{Message, ScanConfig, ScanReport, ScanSession};
use crate::shortcircuit::ShortcircuitPolicy;

/// External checkers keyed by the rule they implement.
pub type CheckerRegistry = HashMap<String, Arc<ExternalChecker>>;

/// Drives one scan at a time over a shared, read-only rule set. Cheap to
/// clone; every scan gets its own session and its own async handles.
#[derive(Clone)]
pub struct RuleScheduler {
    rules: Arc<RuleSet>,
    engine: Arc<dyn RuleEngine>,
    checkers: Arc<CheckerRegistry>,
    policy: ShortcircuitPolicy,
}

impl fmt::Debug for RuleScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleScheduler")
            .field("rules", &self.rules)
            .field("engine", &self.engine)
            .field("checker_rules", &self.checkers.keys().collect::<Vec<_>>())
            .field("policy", &self.policy)
            .finish()
    }
}

impl RuleScheduler {
    pub fn new(
        rules: Arc<RuleSet>,
        engine: Arc<dyn RuleEngine>,
        checkers: Arc<CheckerRegistry>,
        policy: ShortcircuitPolicy,
    ) -> Self {
        Self {
            rules,
            engine,
            checkers,
            policy,
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Open a session from `config`, evaluate `message` and report.
    pub async fn scan(&self, config: &ScanConfig, message: &Message) -> ScanReport {
        let mut session = ScanSession::from_config(config);
        self.evaluate(&mut session, message).await
    }

    /// Evaluate every rule against `message`, recording hits and any
    /// shortcircuit on `session`.
    pub async fn evaluate(&self, session: &mut ScanSession, message: &Message) -> ScanReport {
        let mut pending: Vec<AsyncCheckHandle> = Vec::new();

        for rule in self.rules.iter() {
            if session.is_aborting() {
                debug!(
                    target: "scan::scheduler",
                    scan_id = %session.id(),
                    next_rule = %rule.name(),
                    shortcircuit = session.did_shortcircuit(),
                    "scan aborting, skipping remaining rules"
                );
                break;
            }

            match rule.kind() {
                RuleKind::Sync => self.run_sync(session, message, rule),
                RuleKind::Async => self.run_checker(session, message, rule, &mut pending).await,
            }

            self.tick(session, &mut pending).await;
        }

        self.drain(session, &mut pending).await;

        let report = session.report();
        debug!(
            target: "scan::scheduler",
            scan_id = %report.scan_id,
            score = report.score,
            fired = report.fired_rules.len(),
            shortcircuit = report.shortcircuit.is_some(),
            elapsed_ms = session.deadline().elapsed().as_millis() as u64,
            "scan finished"
        );
        report
    }

    fn run_sync(&self, session: &mut ScanSession, message: &Message, rule: &RuleDescriptor) {
        match self.engine.evaluate_rule(rule, message) {
            Ok(RuleEvaluation::Fired { score }) => self.on_hit(session, rule, score),
            Ok(RuleEvaluation::Missed) => {}
            Err(err) if err.is_abort() => {
                debug!(
                    target: "scan::scheduler",
                    rule = %rule.name(),
                    "rule evaluation aborted: {err}"
                );
                session.request_abort();
            }
            Err(err) => {
                warn!(
                    target: "scan::scheduler",
                    rule = %rule.name(),
                    "rule evaluation failed: {err}"
                );
            }
        }
    }

    /// Run or launch the checker behind an async rule. Repeat invocations
    /// within one scan are no-ops.
    pub async fn run_checker(
        &self,
        session: &mut ScanSession,
        message: &Message,
        rule: &RuleDescriptor,
        pending: &mut Vec<AsyncCheckHandle>,
    ) {
        let Some(checker) = self.checkers.get(rule.name()) else {
            warn!(target: "scan::scheduler", rule = %rule.name(), "async rule has no checker");
            return;
        };

        if !session.mark_running(rule.name()) {
            debug!(
                target: "scan::scheduler",
                rule = %rule.name(),
                "check already running for this scan"
            );
            return;
        }

        if checker.is_forked() {
            if let Some(handle) = checker.launch(session, message) {
                pending.push(handle);
            }
        } else {
            let outcome = checker.check(session, message).await;
            self.apply_check(session, rule.name(), outcome);
        }
    }

    /// Non-blocking pass over outstanding checks.
    async fn tick(&self, session: &mut ScanSession, pending: &mut Vec<AsyncCheckHandle>) {
        for handle in pending.iter_mut() {
            if let PollStatus::Finished(outcome) = handle.tick(session).await {
                self.apply_check(session, handle.rule(), outcome);
            }
        }
        pending.retain(|handle| !handle.is_reaped());
    }

    /// Wait out (or abort) every outstanding check. A check that completes
    /// here can still shortcircuit, which aborts the rest.
    async fn drain(&self, session: &mut ScanSession, pending: &mut Vec<AsyncCheckHandle>) {
        for mut handle in pending.drain(..) {
            if let PollStatus::Finished(outcome) = handle.cleanup(session).await {
                self.apply_check(session, handle.rule(), outcome);
            }
        }
    }

    fn apply_check(
        &self,
        session: &mut ScanSession,
        rule_name: &str,
        outcome: Option<CheckOutcome>,
    ) {
        let Some(rule) = self.rules.get(rule_name) else {
            return;
        };
        let Some(outcome) = outcome else {
            return;
        };

        if let Some(checker) = self.checkers.get(rule_name) {
            session.set_tag(checker.config().summary_tag.clone(), outcome.verdict.summary());
        }

        if outcome.is_hit() {
            self.on_hit(session, rule, rule.score());
        }
    }

    fn on_hit(&self, session: &mut ScanSession, rule: &RuleDescriptor, observed_score: f64) {
        session.record_hit(rule.name(), observed_score);

        let Some(outcome) = self.policy.decide(rule, observed_score) else {
            return;
        };

        let summary = outcome.summary();
        if session.record_shortcircuit(outcome) {
            info!(
                target: "scan::shortcircuit",
                scan_id = %session.id(),
                rule = %rule.name(),
                %summary,
                score = session.score(),
                "shortcircuit"
            );
        } else {
            debug!(
                target: "scan::shortcircuit",
                rule = %rule.name(),
                "shortcircuit already recorded, keeping the first"
            );
        }
        session.request_abort();
    }
}
