use thiserror::Error;

/// Failure raised while evaluating a single rule's test.
#[derive(Error, Debug)]
pub enum RuleError {
    /// The scan is being torn down (deadline exceeded or a shortcircuit
    /// fired). This is control flow, not a failure.
    #[error("Rule evaluation aborted: {0}")]
    Aborted(String),

    #[error("Rule evaluation failed: {0}")]
    Failed(String),
}

impl RuleError {
    pub fn is_abort(&self) -> bool {
        matches!(self, RuleError::Aborted(_))
    }
}

/// Everything that can go wrong while running an external checker. All of
/// these degrade to "no hit" for the owning rule.
#[derive(Error, Debug)]
pub enum CheckerError {
    #[error("Checker disabled: {0}")]
    Disabled(String),

    #[error("Failed to spawn helper: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Helper timed out without producing output")]
    TimedOut,

    #[error("Check cancelled")]
    Cancelled,

    #[error("Helper reported an internal error: {0}")]
    HelperFailed(String),

    #[error("Backchannel error: {0}")]
    Backchannel(String),

    #[error("Failed to decode helper result: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, CheckerError>;
