use thiserror::Error;

use crate::JobId;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue store cannot be reached. Surfaced to the submitter's caller as is.
    #[error("Queue store unavailable: {0}")]
    QueueUnavailable(String),

    /// The caller no longer holds the lock on this job (lost it to the reclaimer
    /// or to another worker). Workers abandon the job silently.
    #[error("Lock on job {0} is not held by this worker")]
    LockNotOwned(JobId),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job is already in terminal state")]
    JobAlreadyTerminal,

    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Worker shutdown")]
    WorkerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Lost-lock errors are expected under contention and must not be escalated
    pub fn is_lock_lost(&self) -> bool {
        matches!(self, Self::LockNotOwned(_))
    }
}

/// Why an execution attempt did not succeed.
///
/// Both variants go through the same retry accounting; `Stalled` only
/// differs in the reason recorded for observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The conversion routine returned a failure or raised
    Execution(String),
    /// The worker stopped renewing its lock
    Stalled,
}

impl FailureReason {
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Execution(msg) => msg,
            Self::Stalled => "stalled",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Error raised by the external conversion routine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("Conversion failed: {0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl ConversionError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

impl From<std::io::Error> for ConversionError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Error raised by the conversion record store or the notification channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("Conversion record not found: {0}")]
    RecordNotFound(String),

    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stalled_reason_message() {
        assert_eq!(FailureReason::Stalled.to_string(), "stalled");
        assert_eq!(FailureReason::execution("bad pdf").message(), "bad pdf");
    }

    #[test]
    fn test_lock_lost_detection() {
        assert!(QueueError::LockNotOwned(JobId::from("conversion:1")).is_lock_lost());
        assert!(!QueueError::JobAlreadyTerminal.is_lock_lost());
    }
}
