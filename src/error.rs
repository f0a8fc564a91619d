//! Error types for RSS Monitor.

use thiserror::Error;

/// Common error type for RSS Monitor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    /// Transient network failure (connection, timeout, 5xx, rate limited).
    ///
    /// The fetcher retries these with backoff before giving up.
    #[error("network error: {0}")]
    Network(String),

    /// The remote document could not be turned into a feed.
    ///
    /// Never retried within a cycle.
    #[error("parse error: {0}")]
    Parse(String),

    /// Validation error for user input (subscription URLs, config values).
    #[error("validation error: {0}")]
    Validation(String),

    /// No snapshot was ever fetched for the URL and the latest attempt failed.
    #[error("feed unavailable: {url}: {reason}")]
    FetchUnavailable {
        /// Feed URL.
        url: String,
        /// Error of the latest attempt.
        reason: String,
    },

    /// Persistence failure in the configuration store.
    #[error("storage error: {0}")]
    Storage(String),

    /// Delivery failure of a single notification sink.
    #[error("sink error: {0}")]
    Sink(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// The scheduler rejected or could not process a request.
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

impl MonitorError {
    /// Whether the fetcher may retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MonitorError::Network(_))
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(e: std::io::Error) -> Self {
        MonitorError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(e: serde_json::Error) -> Self {
        MonitorError::Storage(e.to_string())
    }
}

/// Result type alias for RSS Monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_error_display() {
        let err = MonitorError::Network("connection refused".to_string());
        assert_eq!(err.to_string(), "network error: connection refused");
    }

    #[test]
    fn test_fetch_unavailable_display() {
        let err = MonitorError::FetchUnavailable {
            url: "https://example.com/feed.xml".to_string(),
            reason: "timed out".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "feed unavailable: https://example.com/feed.xml: timed out"
        );
    }

    #[test]
    fn test_not_found_error_display() {
        let err = MonitorError::NotFound("subscription".to_string());
        assert_eq!(err.to_string(), "subscription not found");
    }

    #[test]
    fn test_only_network_errors_are_retryable() {
        assert!(MonitorError::Network("reset".to_string()).is_retryable());
        assert!(!MonitorError::Parse("bad xml".to_string()).is_retryable());
        assert!(!MonitorError::Validation("bad url".to_string()).is_retryable());
        assert!(!MonitorError::Storage("disk full".to_string()).is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: MonitorError = io_err.into();
        assert!(matches!(err, MonitorError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_is_storage_error() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: MonitorError = json_err.into();
        assert!(matches!(err, MonitorError::Storage(_)));
    }
}
