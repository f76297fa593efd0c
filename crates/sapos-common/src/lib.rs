//! # Sapos Common
//!
//! Common utilities, error types, and logging configuration shared by the
//! Sapos League offline worker.
//!
//! ## Features
//!
//! - Unified platform error type
//! - Logging configuration and setup
//! - Retry and timeout utilities
//! - Option extension trait

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod retry;

pub use logging::{init_logging, try_init_logging, LogConfig, LogFormat};
pub use retry::{retry_with_backoff, with_timeout, RetryConfig};

/// Error returned by every host platform seam (network, cache storage,
/// notifications, clients, background sync).
#[derive(Error, Debug)]
pub enum SaposError {
    /// Network fetch failed before a response was produced.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The cache storage rejected a read or write.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The notification API refused to render or close a notification.
    #[error("Notification error: {message}")]
    Notification {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A client window could not be focused, opened or messaged.
    #[error("Client error: {message}")]
    Client {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Background sync registration failed.
    #[error("Sync error: {message}")]
    Sync {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Timeout errors.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),
}

impl SaposError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cache storage error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            source: None,
        }
    }

    /// Create a notification error.
    pub fn notification(message: impl Into<String>) -> Self {
        Self::Notification {
            message: message.into(),
            source: None,
        }
    }

    /// Create a client error.
    pub fn client(message: impl Into<String>) -> Self {
        Self::Client {
            message: message.into(),
            source: None,
        }
    }

    /// Create a sync registration error.
    pub fn sync(message: impl Into<String>) -> Self {
        Self::Sync {
            message: message.into(),
            source: None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SaposError::Network { .. }
                | SaposError::Notification { .. }
                | SaposError::Timeout(_)
        )
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            SaposError::Network { .. } => "network",
            SaposError::Cache { .. } => "cache",
            SaposError::Notification { .. } => "notification",
            SaposError::Client { .. } => "client",
            SaposError::Sync { .. } => "sync",
            SaposError::Timeout(_) => "timeout",
            SaposError::NotFound(_) => "not_found",
        }
    }
}

/// Result type alias for platform operations.
pub type Result<T> = std::result::Result<T, SaposError>;

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| SaposError::NotFound(resource.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(SaposError::network("offline").category(), "network");
        assert_eq!(SaposError::cache("quota").category(), "cache");
        assert_eq!(
            SaposError::Timeout(Duration::from_secs(1)).category(),
            "timeout"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(SaposError::network("offline").is_retryable());
        assert!(SaposError::notification("busy").is_retryable());
        assert!(SaposError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!SaposError::cache("quota").is_retryable());
        assert!(!SaposError::NotFound("client-1".into()).is_retryable());
    }

    #[test]
    fn test_option_ext() {
        let some: Option<i32> = Some(42);
        assert_eq!(some.ok_or_not_found("client").unwrap(), 42);

        let none: Option<i32> = None;
        assert!(matches!(
            none.ok_or_not_found("client"),
            Err(SaposError::NotFound(_))
        ));
    }
}
