//! Runs one helper process to completion, bounded by a timeout.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CheckerError, Result};

/// Everything needed to spawn the helper once.
#[derive(Clone, Debug)]
pub struct HelperCommand {
    pub path: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub grace_period: Duration,
    pub benign_exit_code: Option<i32>,
}

enum ReadOutcome {
    Finished(std::io::Result<usize>),
    TimedOut,
    Cancelled,
}

impl HelperCommand {
    /// Feed `body` to the helper on stdin (through a temp file) and collect
    /// its stdout as lines.
    ///
    /// A timeout with no output is [`CheckerError::TimedOut`]; a timeout with
    /// partial output terminates the helper and returns what was read.
    /// Cancelling `cancel` terminates the helper and returns
    /// [`CheckerError::Cancelled`].
    pub async fn run(&self, body: Arc<[u8]>, cancel: &CancellationToken) -> Result<Vec<String>> {
        // The temp file has to outlive the child; it is removed on drop.
        let (_input, stdin) = spill_body(body).await?;

        let mut child = Command::new(&self.path)
            .args(&self.args)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(CheckerError::Spawn)?;

        let pid = child.id();
        debug!(target: "scan::checker", helper = %self.path.display(), ?pid, "helper spawned");

        let Some(mut stdout) = child.stdout.take() else {
            terminate(&mut child, self.grace_period).await;
            return Err(CheckerError::Backchannel("helper stdout was not captured".into()));
        };

        let mut output = Vec::new();
        let outcome = tokio::select! {
            read = timeout(self.timeout, stdout.read_to_end(&mut output)) => match read {
                Ok(result) => ReadOutcome::Finished(result),
                Err(_) => ReadOutcome::TimedOut,
            },
            _ = cancel.cancelled() => ReadOutcome::Cancelled,
        };
        drop(stdout);

        match outcome {
            ReadOutcome::Finished(Ok(_)) => {
                match timeout(self.grace_period, child.wait()).await {
                    Ok(Ok(status)) => self.log_exit(status),
                    Ok(Err(err)) => {
                        warn!(target: "scan::checker", ?pid, "failed to reap helper: {err}")
                    }
                    Err(_) => {
                        debug!(
                            target: "scan::checker",
                            ?pid,
                            "helper closed stdout but kept running"
                        );
                        terminate(&mut child, self.grace_period).await;
                    }
                }
            }
            ReadOutcome::Finished(Err(err)) => {
                terminate(&mut child, self.grace_period).await;
                return Err(CheckerError::Io(err));
            }
            ReadOutcome::TimedOut => {
                warn!(
                    target: "scan::checker",
                    ?pid,
                    timeout_ms = self.timeout.as_millis() as u64,
                    bytes = output.len(),
                    "helper timed out"
                );
                terminate(&mut child, self.grace_period).await;
                if output.is_empty() {
                    return Err(CheckerError::TimedOut);
                }
            }
            ReadOutcome::Cancelled => {
                debug!(target: "scan::checker", ?pid, "helper cancelled");
                terminate(&mut child, self.grace_period).await;
                return Err(CheckerError::Cancelled);
            }
        }

        Ok(split_lines(&output))
    }

    fn log_exit(&self, status: ExitStatus) {
        match status.code() {
            Some(0) => {}
            Some(code) if Some(code) == self.benign_exit_code => {
                debug!(target: "scan::checker", code, "helper exited with benign status");
            }
            Some(code) => {
                warn!(target: "scan::checker", code, "helper exited with unexpected status");
            }
            None => {
                warn!(target: "scan::checker", "helper terminated by signal");
            }
        }
    }
}

async fn spill_body(body: Arc<[u8]>) -> Result<(NamedTempFile, File)> {
    tokio::task::spawn_blocking(move || -> Result<(NamedTempFile, File)> {
        let mut input = NamedTempFile::new()?;
        input.write_all(&body)?;
        input.flush()?;
        let stdin = input.reopen()?;
        Ok((input, stdin))
    })
    .await
    .map_err(|err| CheckerError::Io(std::io::Error::other(err)))?
}

fn split_lines(output: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(output)
        .lines()
        .map(|line| line.trim_end().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Soft stop, bounded grace wait, then hard stop. Always reaps the child.
pub(crate) async fn terminate(child: &mut Child, grace_period: Duration) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }

    if soft_stop(child, grace_period).await {
        return;
    }

    if let Err(err) = child.start_kill() {
        debug!(target: "scan::checker", "kill failed: {err}");
    }
    if let Err(err) = child.wait().await {
        warn!(target: "scan::checker", "failed to reap killed helper: {err}");
    }
}

/// SIGTERM and wait out the grace period. Returns `true` if the child exited.
#[cfg(unix)]
async fn soft_stop(child: &mut Child, grace_period: Duration) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return true;
    };

    if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        debug!(target: "scan::checker", pid, "SIGTERM failed: {err}");
    }
    if let Ok(Ok(_)) = timeout(grace_period, child.wait()).await {
        return true;
    }
    debug!(target: "scan::checker", pid, "helper ignored SIGTERM, killing");
    false
}

#[cfg(not(unix))]
async fn soft_stop(_child: &mut Child, _grace_period: Duration) -> bool {
    false
}
