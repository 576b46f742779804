#![cfg(unix)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rulegate_core::checker::{CheckerConfig, ExternalChecker};
use rulegate_core::error::RuleError;
use rulegate_core::rules::{RuleDescriptor, RuleKind, RuleSet, ShortcircuitAction};
use rulegate_core::scheduler::{CheckerRegistry, RuleEngine, RuleEvaluation, RuleScheduler};
use rulegate_core::session::{Message, ScanConfig, ScanSession};
use rulegate_core::shortcircuit::ShortcircuitPolicy;
use rulegate_core::Deadline;
use tempfile::TempDir;
use tokio::time::Instant;

const CHECK_RULE: &str = "REPUTATION_CHECK";

#[derive(Debug, Default)]
struct RecordingEngine {
    fires: Vec<String>,
    evaluated: Mutex<Vec<String>>,
}

impl RecordingEngine {
    fn firing(names: &[&str]) -> Self {
        Self {
            fires: names.iter().map(|name| name.to_string()).collect(),
            ..Self::default()
        }
    }

    fn evaluated(&self) -> Vec<String> {
        self.evaluated.lock().expect("lock").clone()
    }
}

impl RuleEngine for RecordingEngine {
    fn evaluate_rule(
        &self,
        rule: &RuleDescriptor,
        _message: &Message,
    ) -> Result<RuleEvaluation, RuleError> {
        self.evaluated
            .lock()
            .expect("lock")
            .push(rule.name().to_string());
        if self.fires.iter().any(|name| name == rule.name()) {
            Ok(RuleEvaluation::fired_with_default(rule))
        } else {
            Ok(RuleEvaluation::Missed)
        }
    }
}

fn helper_script(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("reputation.sh");
    std::fs::write(&path, format!("{body}\n")).expect("write helper script");
    path
}

fn checker(script: &Path, fork: bool) -> Arc<ExternalChecker> {
    let config = CheckerConfig {
        rule: CHECK_RULE.to_string(),
        helper_path: Some(PathBuf::from("/bin/sh")),
        helper_args: script.display().to_string(),
        subcommand: None,
        fork,
        grace_period_ms: 200,
        ..CheckerConfig::default()
    };
    Arc::new(ExternalChecker::new(config).expect("valid checker"))
}

fn scheduler(
    rules: Vec<RuleDescriptor>,
    engine: Arc<RecordingEngine>,
    checker: Arc<ExternalChecker>,
) -> RuleScheduler {
    let mut registry: CheckerRegistry = HashMap::new();
    registry.insert(checker.rule().to_string(), checker);
    RuleScheduler::new(
        Arc::new(RuleSet::new(rules).expect("rule set")),
        engine,
        Arc::new(registry),
        ShortcircuitPolicy::default(),
    )
}

fn check_rule(score: f64) -> RuleDescriptor {
    RuleDescriptor::new(CHECK_RULE, score).with_kind(RuleKind::Async)
}

#[tokio::test]
async fn forked_check_hit_is_collected_at_scan_end() {
    let dir = TempDir::new().expect("tempdir");
    let script = helper_script(
        &dir,
        concat!(
            "cat >/dev/null\n",
            "printf 'a.example:24441\\t(200, OK)\\t4\\t0\\n",
            "b.example:24441\\t(200, OK)\\t3\\t0\\n'",
        ),
    );
    let engine = Arc::new(RecordingEngine::firing(&["LOCAL"]));
    let scheduler = scheduler(
        vec![check_rule(2.5), RuleDescriptor::new("LOCAL", 1.0).with_priority(10)],
        engine.clone(),
        checker(&script, true),
    );

    let report = scheduler
        .scan(&ScanConfig::default(), &Message::new("Subject: hi\n\nbody"))
        .await;

    assert_eq!(engine.evaluated(), vec!["LOCAL"]);
    assert_eq!(report.score, 3.5);
    assert!(report.fired_rules.iter().any(|rule| rule.name == CHECK_RULE));
    assert_eq!(
        report.tags.get("REPUTATION").map(String::as_str),
        Some("Reported 7 times, whitelisted 0 times.")
    );
}

#[tokio::test]
async fn whitelisted_content_is_not_a_hit() {
    let dir = TempDir::new().expect("tempdir");
    let script = helper_script(&dir, "printf 'a.example:24441\\t(200, OK)\\t50\\t11\\n'");
    let engine = Arc::new(RecordingEngine::default());
    let scheduler = scheduler(vec![check_rule(2.5)], engine, checker(&script, false));

    let report = scheduler
        .scan(&ScanConfig::default(), &Message::new("body"))
        .await;

    assert!(report.fired_rules.is_empty());
    assert_eq!(
        report.tags.get("REPUTATION").map(String::as_str),
        Some("Reported 50 times, whitelisted 11 times.")
    );
}

#[tokio::test]
async fn shortcircuit_aborts_an_outstanding_check() {
    let dir = TempDir::new().expect("tempdir");
    let script = helper_script(&dir, "trap '' TERM\nexec sleep 30");
    let engine = Arc::new(RecordingEngine::firing(&["BLOCKED", "NICE"]));
    let scheduler = scheduler(
        vec![
            check_rule(2.5).with_priority(-1000),
            RuleDescriptor::new("BLOCKED", 1.0).with_shortcircuit(ShortcircuitAction::Spam),
            RuleDescriptor::new("NICE", -50.0),
        ],
        engine.clone(),
        checker(&script, true),
    );

    let started = Instant::now();
    let report = scheduler
        .scan(&ScanConfig::default(), &Message::new("body"))
        .await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(report.score, 100.0);
    assert_eq!(report.tags.get("SCTYPE").map(String::as_str), Some("spam"));
    assert_eq!(report.tags.get("SCRULE").map(String::as_str), Some("BLOCKED"));
    assert_eq!(engine.evaluated(), vec!["BLOCKED"]);
    assert!(!report.tags.contains_key("REPUTATION"));
}

/// Fires every rule, sleeping inside `stall` first.
#[derive(Debug)]
struct StallingEngine {
    stall: &'static str,
    pause: Duration,
}

impl RuleEngine for StallingEngine {
    fn evaluate_rule(
        &self,
        rule: &RuleDescriptor,
        _message: &Message,
    ) -> Result<RuleEvaluation, RuleError> {
        if rule.name() == self.stall {
            std::thread::sleep(self.pause);
        }
        Ok(RuleEvaluation::fired_with_default(rule))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn result_finished_before_shortcircuit_is_discarded() {
    let dir = TempDir::new().expect("tempdir");
    let script = helper_script(&dir, "printf 'a.example:24441\\t(200, OK)\\t9\\t0\\n'");
    let mut registry: CheckerRegistry = HashMap::new();
    let checker = checker(&script, true);
    registry.insert(checker.rule().to_string(), checker);
    let scheduler = RuleScheduler::new(
        Arc::new(
            RuleSet::new(vec![
                check_rule(2.5).with_priority(-1000),
                RuleDescriptor::new("BLOCKED", 1.0).with_shortcircuit(ShortcircuitAction::Spam),
            ])
            .expect("rule set"),
        ),
        Arc::new(StallingEngine {
            stall: "BLOCKED",
            pause: Duration::from_millis(500),
        }),
        Arc::new(registry),
        ShortcircuitPolicy::default(),
    );

    let report = scheduler
        .scan(&ScanConfig::default(), &Message::new("body"))
        .await;

    let fired: Vec<_> = report.fired_rules.iter().map(|rule| rule.name.as_str()).collect();
    assert_eq!(fired, vec!["BLOCKED"]);
    assert_eq!(report.score, 100.0);
    assert!(!report.tags.contains_key("REPUTATION"));
}

#[tokio::test]
async fn async_check_can_shortcircuit_the_scan() {
    let dir = TempDir::new().expect("tempdir");
    let script = helper_script(&dir, "printf 'a.example:24441\\t(200, OK)\\t9\\t0\\n'");
    let engine = Arc::new(RecordingEngine::firing(&["LATER"]));
    let scheduler = scheduler(
        vec![
            check_rule(2.5).with_shortcircuit(ShortcircuitAction::On),
            RuleDescriptor::new("LATER", 5.0).with_priority(100),
        ],
        engine.clone(),
        checker(&script, false),
    );

    let report = scheduler
        .scan(&ScanConfig::default(), &Message::new("body"))
        .await;

    let outcome = report.shortcircuit.expect("shortcircuit");
    assert_eq!(outcome.rule, CHECK_RULE);
    assert_eq!(report.score, 2.5);
    assert!(engine.evaluated().is_empty());
}

#[tokio::test]
async fn repeat_launches_within_a_scan_are_ignored() {
    let dir = TempDir::new().expect("tempdir");
    let script = helper_script(&dir, "exec sleep 30");
    let engine = Arc::new(RecordingEngine::default());
    let checker = checker(&script, true);
    let scheduler = scheduler(vec![check_rule(1.0)], engine, checker);

    let rule = scheduler.rules().get(CHECK_RULE).cloned().expect("rule");
    let mut session = ScanSession::new(Deadline::after(Duration::from_secs(30)));
    let message = Message::new("body");
    let mut pending = Vec::new();

    let started = Instant::now();
    scheduler.run_checker(&mut session, &message, &rule, &mut pending).await;
    scheduler.run_checker(&mut session, &message, &rule, &mut pending).await;
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(pending.len(), 1);

    session.request_abort();
    for handle in pending.iter_mut() {
        handle.cleanup(&session).await;
        assert!(handle.is_reaped());
        assert!(!handle.holds_resources());
    }
}

#[tokio::test]
async fn local_only_scans_never_run_the_helper() {
    let dir = TempDir::new().expect("tempdir");
    let marker = dir.path().join("ran");
    let script = helper_script(
        &dir,
        &format!("touch {}\nprintf 'a.example:24441\\t(200, OK)\\t9\\t0\\n'", marker.display()),
    );
    let engine = Arc::new(RecordingEngine::default());
    let scheduler = scheduler(vec![check_rule(2.5)], engine, checker(&script, false));

    let config = ScanConfig {
        local_only: true,
        ..ScanConfig::default()
    };
    let report = scheduler.scan(&config, &Message::new("body")).await;

    assert!(report.fired_rules.is_empty());
    assert!(!marker.exists());
}

#[tokio::test]
async fn broken_helper_degrades_to_no_hit() {
    let dir = TempDir::new().expect("tempdir");
    let script = helper_script(
        &dir,
        "echo 'Traceback (most recent call last):'\necho '  File \"helper\", line 1'\nexit 2",
    );
    let engine = Arc::new(RecordingEngine::firing(&["LOCAL"]));
    let scheduler = scheduler(
        vec![check_rule(2.5), RuleDescriptor::new("LOCAL", 1.0).with_priority(1)],
        engine,
        checker(&script, true),
    );

    let report = scheduler
        .scan(&ScanConfig::default(), &Message::new("body"))
        .await;

    assert_eq!(report.score, 1.0);
    assert_eq!(report.fired_rules.len(), 1);
}
