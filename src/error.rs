// src/error.rs
//! Error taxonomy shared by the orchestrator and its collaborators.

use thiserror::Error;

use crate::retry::Retryable;

#[derive(Debug, Error)]
pub enum DigestError {
    /// Group source mapping unreadable or malformed. Fatal to the cycle.
    #[error("configuration error: {0}")]
    Config(String),

    /// A single source failed to fetch or parse.
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// AI provider / transport failure.
    #[error("AI API error: {message}")]
    Api {
        message: String,
        retryable: bool,
        timeout: bool,
    },

    /// A group task could not be joined (panicked or was cancelled).
    #[error("failed to collect result for group {group}: {reason}")]
    Aggregation { group: String, reason: String },

    #[error("checkpoint store error: {0}")]
    Checkpoint(String),

    #[error("failure persistence error: {0}")]
    Persist(String),

    #[error("delivery error: {0}")]
    Delivery(String),
}

impl DigestError {
    pub fn api(message: impl Into<String>) -> Self {
        DigestError::Api {
            message: message.into(),
            retryable: true,
            timeout: false,
        }
    }

    pub fn api_timeout(message: impl Into<String>) -> Self {
        DigestError::Api {
            message: message.into(),
            retryable: true,
            timeout: true,
        }
    }

    pub fn api_fatal(message: impl Into<String>) -> Self {
        DigestError::Api {
            message: message.into(),
            retryable: false,
            timeout: false,
        }
    }

    /// Classify a reqwest failure: timeouts and connect errors are retryable.
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::api_timeout(e.to_string())
        } else if let Some(status) = e.status() {
            Self::from_status(status.as_u16(), e.to_string())
        } else {
            Self::api(e.to_string())
        }
    }

    /// 429 and 5xx are worth another attempt; other statuses are not.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let message = format!("HTTP {status}: {}", body.into());
        if status == 429 || (500..600).contains(&status) {
            Self::api(message)
        } else {
            Self::api_fatal(message)
        }
    }
}

impl Retryable for DigestError {
    fn is_retryable(&self) -> bool {
        match self {
            DigestError::Api { retryable, .. } => *retryable,
            DigestError::Fetch { .. } => true,
            _ => false,
        }
    }

    fn is_timeout(&self) -> bool {
        matches!(self, DigestError::Api { timeout: true, .. })
    }
}

pub type Result<T> = std::result::Result<T, DigestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(DigestError::from_status(429, "slow down").is_retryable());
        assert!(DigestError::from_status(503, "busy").is_retryable());
        assert!(!DigestError::from_status(401, "bad key").is_retryable());
        assert!(!DigestError::from_status(400, "bad request").is_timeout());
    }

    #[test]
    fn config_errors_are_never_retried() {
        assert!(!DigestError::Config("missing".into()).is_retryable());
        assert!(DigestError::api_timeout("read timed out").is_timeout());
    }
}
