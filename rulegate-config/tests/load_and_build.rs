use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::Lazy;
use rulegate_config::loader::{CONFIG_JSON_ENV, CONFIG_PATH_ENV};
use rulegate_config::{ConfigSource, RulegateConfig};
use rulegate_core::error::RuleError;
use rulegate_core::rules::{RuleDescriptor, RuleKind};
use rulegate_core::scheduler::{RuleEngine, RuleEvaluation};
use rulegate_core::session::Message;
use tempfile::TempDir;

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Holds the env lock and clears the config variables on both ends.
struct EnvGuard {
    _lock: MutexGuard<'static, ()>,
}

impl EnvGuard {
    fn acquire() -> Self {
        let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        clear_env();
        Self { _lock: lock }
    }

    fn set(&self, key: &str, value: &str) {
        // SAFETY: every test touching the environment holds ENV_LOCK.
        unsafe { std::env::set_var(key, value) };
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        clear_env();
    }
}

fn clear_env() {
    // SAFETY: only called with ENV_LOCK held.
    unsafe {
        std::env::remove_var(CONFIG_PATH_ENV);
        std::env::remove_var(CONFIG_JSON_ENV);
    }
}

const RULES_TOML: &str = r#"
[scan]
deadline_ms = 20000

[shortcircuit]
spam_score = 50.0

[[rules]]
name = "SENDER_BLOCKED"
score = 3.0
shortcircuit = "spam"
priority = 200

[[rules]]
name = "SUBJECT_FREE_MONEY"
score = 1.2

[[rules]]
name = "REPUTATION_CHECK"
kind = "async"
score = 2.5
priority = -100

[[checkers]]
name = "reputation"
rule = "REPUTATION_CHECK"
helper_path = "/usr/local/bin/rep-helper"
helper_args = "--homedir /var/lib/rep"
fork = true
"#;

fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create config dir");
    }
    fs::write(&path, contents).expect("write config");
    path
}

#[derive(Debug)]
struct NeverFires;

impl RuleEngine for NeverFires {
    fn evaluate_rule(
        &self,
        _rule: &RuleDescriptor,
        _message: &Message,
    ) -> Result<RuleEvaluation, RuleError> {
        Ok(RuleEvaluation::Missed)
    }
}

#[test]
fn env_path_wins_over_inline_json_and_default_files() {
    let env = EnvGuard::acquire();
    let dir = TempDir::new().expect("tempdir");
    let explicit = write(dir.path(), "custom.toml", RULES_TOML);
    write(dir.path(), "rulegate.toml", "[scan]\ndeadline_ms = 1\n");
    env.set(CONFIG_PATH_ENV, &explicit.display().to_string());
    env.set(CONFIG_JSON_ENV, r#"{"scan":{"deadline_ms":2}}"#);

    let (config, source) = RulegateConfig::load_from_env_in(dir.path()).expect("load");
    assert_eq!(source, ConfigSource::EnvPath(explicit));
    assert_eq!(config.scan.deadline_ms, 20_000);
    assert_eq!(config.rules.len(), 3);
    assert_eq!(config.checkers[0].helper_args, "--homedir /var/lib/rep");
}

#[test]
fn inline_json_is_used_without_a_path() {
    let env = EnvGuard::acquire();
    let dir = TempDir::new().expect("tempdir");
    env.set(
        CONFIG_JSON_ENV,
        r#"{"scan":{"local_only":true},"rules":[{"name":"A","shortcircuit":"on"}]}"#,
    );

    let (config, source) = RulegateConfig::load_from_env_in(dir.path()).expect("load");
    assert_eq!(source, ConfigSource::EnvInline);
    assert!(config.scan.local_only);
    assert_eq!(config.scan.deadline_ms, 300_000);
    assert_eq!(config.rules[0].shortcircuit, "on");
}

#[test]
fn malformed_inline_json_names_the_variable() {
    let env = EnvGuard::acquire();
    let dir = TempDir::new().expect("tempdir");
    env.set(CONFIG_JSON_ENV, "{not json");

    let err = RulegateConfig::load_from_env_in(dir.path()).expect_err("invalid json");
    assert!(format!("{err:#}").contains(CONFIG_JSON_ENV));
}

#[test]
fn default_files_are_discovered_in_order() {
    let _env = EnvGuard::acquire();
    let dir = TempDir::new().expect("tempdir");
    let nested = write(
        dir.path(),
        "config/rulegate.json",
        r#"{"rules":[{"name":"FROM_JSON"}]}"#,
    );

    let (config, source) = RulegateConfig::load_from_env_in(dir.path()).expect("load");
    assert_eq!(source, ConfigSource::File(nested));
    assert_eq!(config.rules[0].name, "FROM_JSON");

    let top = write(dir.path(), "rulegate.toml", "[[rules]]\nname = \"FROM_TOML\"\n");
    let (config, source) = RulegateConfig::load_from_env_in(dir.path()).expect("load");
    assert_eq!(source, ConfigSource::File(top));
    assert_eq!(config.rules[0].name, "FROM_TOML");
}

#[test]
fn nothing_configured_falls_back_to_defaults() {
    let _env = EnvGuard::acquire();
    let dir = TempDir::new().expect("tempdir");

    let (config, source) = RulegateConfig::load_from_env_in(dir.path()).expect("load");
    assert_eq!(source, ConfigSource::Default);
    assert_eq!(config, RulegateConfig::default());
    assert!(config.build().expect("empty config builds").rules.is_empty());
}

#[test]
fn unknown_extension_is_sniffed() {
    let dir = TempDir::new().expect("tempdir");
    let path = write(dir.path(), "rules.conf", RULES_TOML);
    let config = RulegateConfig::load_from_file(&path).expect("sniffed toml");
    assert_eq!(config.rules[2].kind, RuleKind::Async);
}

#[tokio::test]
async fn loaded_config_drives_a_scheduler() {
    let dir = TempDir::new().expect("tempdir");
    let path = write(dir.path(), "rulegate.toml", RULES_TOML);
    let loaded = RulegateConfig::load_from_file(&path)
        .expect("load")
        .build()
        .expect("build");

    let order: Vec<_> = loaded.rules.iter().map(|rule| rule.name().to_string()).collect();
    assert_eq!(
        order,
        vec!["SENDER_BLOCKED", "REPUTATION_CHECK", "SUBJECT_FREE_MONEY"]
    );
    assert_eq!(loaded.policy.config().spam_score, 50.0);

    let config = rulegate_core::session::ScanConfig {
        local_only: true,
        ..loaded.scan
    };
    let scheduler = loaded.scheduler(Arc::new(NeverFires));
    let report = scheduler.scan(&config, &Message::new("Subject: hello\n\nhi")).await;
    assert_eq!(report.score, 0.0);
    assert!(report.fired_rules.is_empty());
    assert!(!report.aborted);
}
