//! Error types for the orchestration engine

use thiserror::Error;

/// Errors produced by pipeline stages and the external calls they wrap.
///
/// The retry policy keys off [`StageError::is_transient`]: timeouts,
/// connection failures, HTTP 429 and HTTP 5xx are retried, everything else
/// propagates immediately.
#[derive(Debug, Error)]
pub enum StageError {
    /// An external call timed out
    #[error("timeout: {0}")]
    Timeout(String),

    /// Connection could not be established or was dropped mid-flight
    #[error("connection error: {0}")]
    Connection(String),

    /// Upstream service answered with an error status
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },

    /// Local filesystem problem while producing an artifact
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stage picked an edge the transition table does not have
    #[error("stage '{stage}' returned unsupported next_action '{action}'")]
    InvalidTransition { stage: String, action: String },

    /// Anything else; never retried
    #[error("{0}")]
    Fatal(String),
}

impl StageError {
    /// Create a terminal error from a message
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Whether a retry has a chance of succeeding
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connection(_) => true,
            Self::Http { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for StageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            Self::Fatal(err.to_string())
        }
    }
}

/// Errors surfaced by registry operations.
///
/// `NotFound` and `Conflict` are caller mistakes and never mutate job state;
/// the rest indicate snapshot persistence problems.
#[derive(Debug, Error)]
pub enum JobStoreError {
    /// Unknown job id
    #[error("job not found: {0}")]
    NotFound(String),

    /// The operation requires the job to be in a different status
    #[error("job {job_id} is {status}, expected {expected}")]
    Conflict {
        job_id: String,
        status: String,
        expected: String,
    },

    /// Snapshot file could not be written or read
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot payload could not be encoded or decoded
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_and_connections_are_transient() {
        assert!(StageError::Timeout("deadline".into()).is_transient());
        assert!(StageError::Connection("refused".into()).is_transient());
    }

    #[test]
    fn test_http_transience_by_status() {
        let transient = |status| StageError::Http {
            status,
            message: String::new(),
        }
        .is_transient();

        assert!(transient(429));
        assert!(transient(500));
        assert!(transient(503));
        assert!(!transient(400));
        assert!(!transient(404));
        assert!(!transient(422));
    }

    #[test]
    fn test_fatal_is_terminal() {
        assert!(!StageError::fatal("bad input").is_transient());
        assert!(!StageError::InvalidTransition {
            stage: "script".into(),
            action: "select_music".into(),
        }
        .is_transient());
    }
}
