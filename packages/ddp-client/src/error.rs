//! Error types for the DDP client.

use thiserror::Error;

/// Result type for DDP client operations.
pub type Result<T> = std::result::Result<T, PollerError>;

/// DDP client errors.
#[derive(Debug, Error)]
pub enum PollerError {
    /// Configuration error (missing backend URL or token, bad numbers)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error (connection refused, DNS, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx response from the backend
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Response body was not valid JSON
    #[error("Parse error: {0}")]
    Parse(String),

    /// Submission response carried no recognised job identifier
    #[error("Submission response did not contain a job id")]
    MissingJobId,

    /// A session for this job is already running on this poller
    #[error("Job {0} is already being polled")]
    AlreadyPolling(String),
}

impl PollerError {
    /// Whether this error came from talking to the backend rather than from
    /// local misuse. Transport errors end a poll session; they are never
    /// confused with a job that reported failure.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            PollerError::Network(_) | PollerError::Api { .. } | PollerError::Parse(_)
        )
    }
}

impl From<reqwest::Error> for PollerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            PollerError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            PollerError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            PollerError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for PollerError {
    fn from(err: serde_json::Error) -> Self {
        PollerError::Parse(err.to_string())
    }
}
