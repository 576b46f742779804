//! Per-message scan state.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::deadline::Deadline;
use crate::shortcircuit::{self, ShortcircuitOutcome};

/// The message under classification. Cloning is cheap; the body is shared
/// with any helper tasks launched for it.
#[derive(Clone)]
pub struct Message {
    body: Arc<[u8]>,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: Arc::from(body.into()),
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn shared_body(&self) -> Arc<[u8]> {
        Arc::clone(&self.body)
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.body.len())
            .finish()
    }
}

/// Per-scan options.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Wall-clock budget for one scan (ms).
    pub deadline_ms: u64,
    /// Disable every external checker.
    pub local_only: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 300_000,
            local_only: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FiredRule {
    pub name: String,
    pub score: f64,
}

/// Final state handed back to the host once a scan completes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan_id: Uuid,
    pub score: f64,
    pub fired_rules: Vec<FiredRule>,
    pub shortcircuit: Option<ShortcircuitOutcome>,
    pub autolearn_disabled: bool,
    pub aborted: bool,
    pub tags: BTreeMap<String, String>,
}

/// State for one scan. Owned by the scheduler for the scan's duration and
/// never shared across scans.
#[derive(Debug)]
pub struct ScanSession {
    id: Uuid,
    deadline: Deadline,
    local_only: bool,
    fired: Vec<FiredRule>,
    tags: BTreeMap<String, String>,
    shortcircuit: Option<ShortcircuitOutcome>,
    abort: CancellationToken,
    autolearn_disabled: bool,
    running_checks: HashSet<String>,
}

impl ScanSession {
    pub fn new(deadline: Deadline) -> Self {
        Self {
            id: Uuid::now_v7(),
            deadline,
            local_only: false,
            fired: Vec::new(),
            tags: BTreeMap::new(),
            shortcircuit: None,
            abort: CancellationToken::new(),
            autolearn_disabled: false,
            running_checks: HashSet::new(),
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(Deadline::from_millis(config.deadline_ms)).with_local_only(config.local_only)
    }

    /// Skip every network-backed check for this scan.
    pub fn with_local_only(mut self, local_only: bool) -> Self {
        self.local_only = local_only;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    pub fn local_only(&self) -> bool {
        self.local_only
    }

    /// Token cancelled when the scan aborts. Async checks hold a child of it.
    pub fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }

    pub fn request_abort(&self) {
        self.abort.cancel();
    }

    /// True once a shortcircuit fired or the deadline passed.
    pub fn is_aborting(&self) -> bool {
        self.abort.is_cancelled() || self.deadline.is_expired()
    }

    pub fn record_hit(&mut self, name: impl Into<String>, score: f64) {
        self.fired.push(FiredRule {
            name: name.into(),
            score,
        });
    }

    pub fn fired_rules(&self) -> &[FiredRule] {
        &self.fired
    }

    /// Shortcircuited scans report the outcome's effective score; otherwise
    /// the plain sum of fired rule scores.
    pub fn score(&self) -> f64 {
        match &self.shortcircuit {
            Some(outcome) => outcome.effective_score,
            None => self.fired.iter().map(|rule| rule.score).sum(),
        }
    }

    /// Record a shortcircuit. The first one wins; returns `false` when an
    /// outcome was already present and the new one was dropped.
    pub fn record_shortcircuit(&mut self, outcome: ShortcircuitOutcome) -> bool {
        if self.shortcircuit.is_some() {
            return false;
        }
        self.shortcircuit = Some(outcome);
        self.autolearn_disabled = true;
        true
    }

    pub fn shortcircuit(&self) -> Option<&ShortcircuitOutcome> {
        self.shortcircuit.as_ref()
    }

    pub fn did_shortcircuit(&self) -> bool {
        self.shortcircuit.is_some()
    }

    pub fn autolearn_disabled(&self) -> bool {
        self.autolearn_disabled
    }

    pub fn set_tag(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(name.into(), value.into());
    }

    /// Look up a report tag. Shortcircuit tags are derived from session
    /// state at call time; everything else comes from the stored map.
    pub fn tag(&self, name: &str) -> Option<String> {
        shortcircuit::tag_value(self.shortcircuit.as_ref(), name)
            .or_else(|| self.tags.get(name).cloned())
    }

    /// Mark an async check as running. Returns `false` when it already was,
    /// in which case the caller must not launch it again.
    pub fn mark_running(&mut self, rule: &str) -> bool {
        self.running_checks.insert(rule.to_string())
    }

    pub fn report(&self) -> ScanReport {
        let mut tags = self.tags.clone();
        for name in [
            shortcircuit::TAG_SC,
            shortcircuit::TAG_SCRULE,
            shortcircuit::TAG_SCTYPE,
        ] {
            if let Some(value) = self.tag(name) {
                tags.insert(name.to_string(), value);
            }
        }

        ScanReport {
            scan_id: self.id,
            score: self.score(),
            fired_rules: self.fired.clone(),
            shortcircuit: self.shortcircuit.clone(),
            autolearn_disabled: self.autolearn_disabled,
            aborted: self.is_aborting(),
            tags,
        }
    }
}
