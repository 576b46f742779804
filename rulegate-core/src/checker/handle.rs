use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::backchannel::{self, BackchannelReader};
use super::helper::HelperCommand;
use super::{CheckOutcome, ExternalChecker};
use crate::deadline::Deadline;
use crate::error::CheckerError;
use crate::session::ScanSession;

/// Lifecycle of one detached check.
///
/// `Spawned -> {Completed, TimedOut, Aborted} -> Reaped`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CheckState {
    Spawned,
    Completed,
    TimedOut,
    Aborted,
    Reaped,
}

/// Result of one poll.
#[derive(Clone, Debug, PartialEq)]
pub enum PollStatus {
    /// Runner still working; poll again later.
    Pending,
    /// The handle has been reaped. Carries the outcome when the runner
    /// completed and its result decoded cleanly.
    Finished(Option<CheckOutcome>),
}

/// An outstanding detached check. Owned by the scheduler of a single scan.
pub struct AsyncCheckHandle {
    checker: Arc<ExternalChecker>,
    state: CheckState,
    terminal: Option<CheckState>,
    task: Option<JoinHandle<()>>,
    backchannel: Option<BackchannelReader>,
    stop: CancellationToken,
    grace_period: Duration,
    launched_at: Instant,
}

impl fmt::Debug for AsyncCheckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCheckHandle")
            .field("rule", &self.checker.rule())
            .field("state", &self.state)
            .field("terminal", &self.terminal)
            .field("task_alive", &self.task.is_some())
            .field("backchannel_open", &self.backchannel.is_some())
            .field("elapsed", &self.launched_at.elapsed())
            .finish()
    }
}

impl AsyncCheckHandle {
    pub(super) fn spawn(
        checker: Arc<ExternalChecker>,
        command: HelperCommand,
        body: Arc<[u8]>,
        stop: CancellationToken,
    ) -> Self {
        // Both ends exist before the runner does; the runner only ever sees
        // the writer.
        let (reader, writer) = backchannel::channel();
        let runner_stop = stop.clone();
        let name = checker.config().name.clone();
        let grace_period = command.grace_period;

        let task = tokio::spawn(async move {
            match command.run(body, &runner_stop).await {
                Ok(lines) => {
                    if let Err(err) = writer.send(&lines).await {
                        warn!(
                            target: "scan::checker",
                            checker = %name,
                            "failed to report result: {err}"
                        );
                    }
                }
                Err(CheckerError::Cancelled) => drop(writer),
                Err(err) => {
                    warn!(target: "scan::checker", checker = %name, "detached check failed: {err}");
                    drop(writer);
                }
            }
        });

        debug!(target: "scan::checker", rule = %checker.rule(), "async check spawned");

        Self {
            grace_period,
            checker,
            state: CheckState::Spawned,
            terminal: None,
            task: Some(task),
            backchannel: Some(reader),
            stop,
            launched_at: Instant::now(),
        }
    }

    pub fn rule(&self) -> &str {
        self.checker.rule()
    }

    pub fn state(&self) -> CheckState {
        self.state
    }

    /// How the check ended (`Completed`, `TimedOut` or `Aborted`), once it has.
    pub fn terminal_state(&self) -> Option<CheckState> {
        self.terminal
    }

    pub fn is_reaped(&self) -> bool {
        self.state == CheckState::Reaped
    }

    /// Whether a runner task or backchannel is still held.
    pub fn holds_resources(&self) -> bool {
        self.task.is_some() || self.backchannel.is_some()
    }

    /// Non-blocking progress check between rules.
    pub async fn tick(&mut self, session: &ScanSession) -> PollStatus {
        self.poll(session.is_aborting(), false, session.deadline()).await
    }

    /// Final wait at scan end. Blocks on the runner unless the scan is
    /// already aborting.
    pub async fn cleanup(&mut self, session: &ScanSession) -> PollStatus {
        self.poll(session.is_aborting(), true, session.deadline()).await
    }

    /// Single re-entry point behind [`tick`](Self::tick) and
    /// [`cleanup`](Self::cleanup).
    ///
    /// Never blocks past `deadline`. When `aborting` is set the handle is
    /// stopped (soft stop, grace wait, hard stop) and reaped, and any result
    /// not yet read is dropped.
    pub async fn poll(&mut self, aborting: bool, block: bool, deadline: &Deadline) -> PollStatus {
        if self.is_reaped() {
            return PollStatus::Finished(None);
        }

        // An aborting scan discards results even when the runner already
        // finished but nobody has read them yet.
        if aborting {
            self.escalate(CheckState::Aborted).await;
            return PollStatus::Finished(None);
        }

        let Some(task) = self.task.as_mut() else {
            self.reap();
            return PollStatus::Finished(None);
        };

        if task.is_finished() {
            let joined = task.await;
            self.task = None;
            return PollStatus::Finished(self.collect(joined).await);
        }

        if !block {
            return PollStatus::Pending;
        }

        let waited = timeout(deadline.remaining(), &mut *task).await;
        match waited {
            Ok(joined) => {
                self.task = None;
                PollStatus::Finished(self.collect(joined).await)
            }
            Err(_) => {
                warn!(
                    target: "scan::checker",
                    rule = %self.rule(),
                    elapsed_ms = self.launched_at.elapsed().as_millis() as u64,
                    "scan deadline reached while waiting for async check"
                );
                self.escalate(CheckState::TimedOut).await;
                PollStatus::Finished(None)
            }
        }
    }

    async fn collect(&mut self, joined: Result<(), JoinError>) -> Option<CheckOutcome> {
        self.state = CheckState::Completed;
        self.terminal = Some(CheckState::Completed);

        if let Err(err) = joined {
            warn!(
                target: "scan::checker",
                rule = %self.rule(),
                "check runner did not finish cleanly: {err}"
            );
        }

        let Some(reader) = self.backchannel.take() else {
            self.reap();
            return None;
        };
        let received = match timeout(self.grace_period, reader.receive()).await {
            Ok(received) => received,
            Err(_) => Err(CheckerError::Backchannel("read stalled".into())),
        };

        let outcome = match received.and_then(|lines| self.checker.evaluate(&lines)) {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                warn!(
                    target: "scan::checker",
                    rule = %self.rule(),
                    "discarding async check result: {err}"
                );
                None
            }
        };

        debug!(
            target: "scan::checker",
            rule = %self.rule(),
            elapsed_ms = self.launched_at.elapsed().as_millis() as u64,
            hit = outcome.as_ref().is_some_and(CheckOutcome::is_hit),
            "async check completed"
        );
        self.reap();
        outcome
    }

    /// Soft stop, bounded grace wait, hard stop, reap.
    async fn escalate(&mut self, terminal: CheckState) {
        self.state = terminal;
        self.terminal = Some(terminal);
        self.stop.cancel();

        if let Some(mut task) = self.task.take() {
            let stopped = timeout(self.grace_period, &mut task).await;
            match stopped {
                Ok(_) => {
                    debug!(target: "scan::checker", rule = %self.rule(), "async check stopped");
                }
                Err(_) => {
                    debug!(
                        target: "scan::checker",
                        rule = %self.rule(),
                        "async check ignored stop, aborting"
                    );
                    task.abort();
                    // Dropping the runner kills the helper (`kill_on_drop`).
                    let _ = task.await;
                }
            }
        }

        self.reap();
    }

    fn reap(&mut self) {
        self.task = None;
        self.backchannel = None;
        if self.terminal.is_none() {
            self.terminal = Some(self.state);
        }
        self.state = CheckState::Reaped;
        debug!(
            target: "scan::checker",
            rule = %self.rule(),
            terminal = ?self.terminal,
            elapsed_ms = self.launched_at.elapsed().as_millis() as u64,
            "async check reaped"
        );
    }
}

impl Drop for AsyncCheckHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.stop.cancel();
            task.abort();
        }
    }
}
