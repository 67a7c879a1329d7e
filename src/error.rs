//! Error types for the Raven client
//!
//! Only [`RavenError`] ever reaches the caller, and only while a client is
//! being constructed. Everything that goes wrong during a capture is a
//! [`CaptureError`], which is reported through the error hook or the
//! diagnostic log and then swallowed.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced while constructing a client
#[derive(Error, Debug)]
pub enum RavenError {
    /// No DSN was supplied (e.g. `RAVEN_DSN` is unset)
    #[error("Missing configuration: no DSN provided")]
    MissingConfig,

    /// The DSN could not be parsed into a collector target
    #[error("Invalid DSN '{dsn}': {source}")]
    InvalidDsn {
        dsn: String,
        #[source]
        source: DsnError,
    },
}

/// Reasons a DSN string fails to parse
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DsnError {
    #[error("malformed URI: {0}")]
    Url(#[from] url::ParseError),

    #[error("no credentials in the user-info segment")]
    MissingCredentials,

    #[error("user-info segment has no ':' separating public and private key")]
    MissingPrivateKey,

    #[error("no host")]
    MissingHost,

    #[error("scheme '{0}' has no known default port")]
    MissingPort(String),

    #[error("no project id in the final path segment")]
    MissingProjectId,
}

/// Failures on the capture path; absorbed, never returned to callers
#[derive(Error, Debug)]
pub enum CaptureError {
    /// Event could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Gzip compression of the payload failed
    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),

    /// Connection, DNS or body transfer failure
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Collector answered with a non-success status code
    #[error("Failed to send event: HTTP {0}")]
    SendFailed(reqwest::StatusCode),

    /// Collector answered 2xx but the body was not `{"id": ...}`
    #[error("Unreadable collector response: {0}")]
    Decode(String),

    /// No response within the configured timeout
    #[error("No response from collector within {0:?}")]
    Timeout(Duration),

    /// Capture was called outside a tokio runtime
    #[error("No async runtime available to run the transmission")]
    NoRuntime,

    /// Transmission task ended without reporting a result
    #[error("Transmission ended without a result")]
    Abandoned,

    /// A caller-supplied serializer, scrubber or error type panicked
    #[error("Capture step panicked: {0}")]
    Panicked(String),
}

/// Failure fetching a single context field
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("not available")]
    Unavailable,

    #[error("{0}")]
    Failed(String),

    #[error("provider panicked: {0}")]
    Panicked(String),
}

impl ContextError {
    /// Create a failure from any message
    pub fn failed(msg: impl Into<String>) -> Self {
        ContextError::Failed(msg.into())
    }
}

impl CaptureError {
    /// Whether the failure came from the bounded wait expiring
    pub fn is_timeout(&self) -> bool {
        matches!(self, CaptureError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RavenError::MissingConfig;
        assert!(err.to_string().contains("Missing configuration"));

        let err = ContextError::failed("header collection blew up");
        assert_eq!(err.to_string(), "header collection blew up");
    }

    #[test]
    fn test_invalid_dsn_keeps_cause() {
        let err = RavenError::InvalidDsn {
            dsn: "http://example.com/1".to_string(),
            source: DsnError::MissingCredentials,
        };
        let source = std::error::Error::source(&err).expect("cause is attached");
        assert!(source.to_string().contains("credentials"));
    }

    #[test]
    fn test_capture_error_from_json() {
        let json_err = serde_json::from_str::<()>("invalid").unwrap_err();
        let err: CaptureError = json_err.into();
        assert!(matches!(err, CaptureError::Serialization(_)));
        assert!(!err.is_timeout());
        assert!(CaptureError::Timeout(Duration::from_secs(1)).is_timeout());
    }
}
