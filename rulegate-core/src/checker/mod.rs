//! External checkers: rules answered by an out-of-process helper.
//!
//! A checker runs either synchronously ([`ExternalChecker::check`], the
//! scheduler waits for the helper) or detached ([`ExternalChecker::launch`],
//! the scheduler gets an [`AsyncCheckHandle`] back immediately and polls it).
//! Both paths share the same response parsing and hit decision.

pub mod backchannel;
mod config;
mod handle;
mod helper;
pub mod response;

pub use config::{CheckerConfig, UnsafeHelperArgs};
pub use handle::{AsyncCheckHandle, CheckState, PollStatus};
pub use helper::HelperCommand;
pub use response::{CheckerVerdict, Decision, Thresholds};

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CheckerError, Result};
use crate::session::{Message, ScanSession};

/// Parsed result of one completed check.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckOutcome {
    pub verdict: CheckerVerdict,
    pub decision: Decision,
}

impl CheckOutcome {
    pub fn is_hit(&self) -> bool {
        self.decision.is_hit()
    }
}

/// One configured provider.
pub struct ExternalChecker {
    config: CheckerConfig,
    argv: Vec<String>,
}

impl fmt::Debug for ExternalChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalChecker")
            .field("name", &self.config.name)
            .field("rule", &self.config.rule)
            .field("enabled", &self.config.enabled)
            .field("fork", &self.config.fork)
            .field("helper_path", &self.config.helper_path)
            .finish()
    }
}

impl ExternalChecker {
    pub fn new(config: CheckerConfig) -> std::result::Result<Self, UnsafeHelperArgs> {
        let argv = config.helper_argv()?;
        Ok(Self { config, argv })
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    pub fn rule(&self) -> &str {
        &self.config.rule
    }

    pub fn is_forked(&self) -> bool {
        self.config.fork
    }

    /// Why this checker cannot run for `message` in `session`, if anything.
    pub fn availability(&self, session: &ScanSession, message: &Message) -> Result<()> {
        if !self.config.enabled {
            return Err(CheckerError::Disabled("disabled by configuration".into()));
        }
        if self.config.helper_path.is_none() {
            return Err(CheckerError::Disabled("no helper path configured".into()));
        }
        if session.local_only() {
            return Err(CheckerError::Disabled("local-only scan".into()));
        }
        if message.len() > self.config.max_body_bytes {
            return Err(CheckerError::Disabled(format!(
                "body of {} bytes exceeds limit of {}",
                message.len(),
                self.config.max_body_bytes
            )));
        }
        if session.is_aborting() {
            return Err(CheckerError::Cancelled);
        }
        Ok(())
    }

    fn helper_command(&self, session: &ScanSession) -> Result<HelperCommand> {
        let path = self
            .config
            .helper_path
            .clone()
            .ok_or_else(|| CheckerError::Disabled("no helper path configured".into()))?;
        Ok(HelperCommand {
            path,
            args: self.argv.clone(),
            timeout: session.deadline().clamp(self.config.timeout()),
            grace_period: self.config.grace_period(),
            benign_exit_code: self.config.benign_exit_code,
        })
    }

    /// Response lines to outcome. Shared by the synchronous and detached
    /// paths.
    pub fn evaluate<S: AsRef<str>>(&self, lines: &[S]) -> Result<CheckOutcome> {
        let verdict = response::parse_response(lines, &self.config.error_markers)?;
        let decision = verdict.decide(&self.config.thresholds());
        debug!(
            target: "scan::checker",
            checker = %self.config.name,
            reports = verdict.report_count,
            whitelisted = verdict.whitelist_count,
            ?decision,
            "checker verdict"
        );
        Ok(CheckOutcome { verdict, decision })
    }

    /// Run the lookup in-line. Any failure is logged and reported as `None`
    /// (no hit).
    pub async fn check(&self, session: &ScanSession, message: &Message) -> Option<CheckOutcome> {
        if let Err(err) = self.availability(session, message) {
            debug!(target: "scan::checker", checker = %self.config.name, "skipping check: {err}");
            return None;
        }

        let result = match self.helper_command(session) {
            Ok(command) => {
                let cancel = session.abort_token().child_token();
                command
                    .run(message.shared_body(), &cancel)
                    .await
                    .and_then(|lines| self.evaluate(&lines))
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(outcome) => Some(outcome),
            Err(CheckerError::Cancelled) => {
                debug!(target: "scan::checker", checker = %self.config.name, "check cancelled");
                None
            }
            Err(err) => {
                warn!(target: "scan::checker", checker = %self.config.name, "check failed: {err}");
                None
            }
        }
    }

    /// Start the lookup in a detached runner and return without waiting for
    /// it. `None` when the checker cannot run for this scan.
    pub fn launch(
        self: &Arc<Self>,
        session: &ScanSession,
        message: &Message,
    ) -> Option<AsyncCheckHandle> {
        if let Err(err) = self.availability(session, message) {
            debug!(target: "scan::checker", checker = %self.config.name, "not launching: {err}");
            return None;
        }

        let command = match self.helper_command(session) {
            Ok(command) => command,
            Err(err) => {
                warn!(target: "scan::checker", checker = %self.config.name, "not launching: {err}");
                return None;
            }
        };

        let stop: CancellationToken = session.abort_token().child_token();
        Some(AsyncCheckHandle::spawn(
            Arc::clone(self),
            command,
            message.shared_body(),
            stop,
        ))
    }
}
