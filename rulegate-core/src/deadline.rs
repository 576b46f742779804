use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Wall-clock budget for one scan. Every blocking operation performed on
/// behalf of the scan is bounded by [`Deadline::remaining`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    started_at: Instant,
    expires_at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        let started_at = Instant::now();
        Self {
            started_at,
            expires_at: started_at + budget,
        }
    }

    pub fn from_millis(budget_ms: u64) -> Self {
        Self::after(Duration::from_millis(budget_ms))
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time left before expiry, saturating at zero.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Clamp a per-operation timeout so it never outlives the scan.
    pub fn clamp(&self, timeout: Duration) -> Duration {
        timeout.min(self.remaining())
    }
}

impl fmt::Debug for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deadline")
            .field("elapsed", &self.elapsed())
            .field("remaining", &self.remaining())
            .finish()
    }
}
