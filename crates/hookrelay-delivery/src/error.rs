//! Error types for webhook delivery operations.
//!
//! Defines all failure conditions in the delivery pipeline, categorized for
//! retry decisions: transient destination errors drive backoff and circuit
//! opening, permanent errors stop retries, and circuit-open is a distinct
//! local short-circuit decision rather than a destination failure.

use std::fmt;

use chrono::{DateTime, Utc};
use hookrelay_core::{CoreError, WebhookId};
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error taxonomy for webhook delivery operations.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    Network {
        /// Description of the transport failure.
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Seconds before the request timed out.
        timeout_seconds: u64,
    },

    /// HTTP response indicated client error (4xx).
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code.
        status_code: u16,
        /// Response body content.
        body: String,
    },

    /// HTTP response indicated server error (5xx).
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code.
        status_code: u16,
        /// Response body content.
        body: String,
    },

    /// Rate limit exceeded with retry guidance.
    #[error("rate limited: retry after {retry_after_seconds}s")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_seconds: u64,
    },

    /// Circuit breaker is open; the operation was never attempted.
    ///
    /// Distinct from a propagated destination failure so callers can tell
    /// "we didn't even try" from "we tried and failed".
    #[error("circuit breaker open since last failure at {last_failure_at}")]
    CircuitOpen {
        /// When the failure that keeps the circuit open was recorded.
        last_failure_at: DateTime<Utc>,
    },

    /// Webhook registration does not exist.
    #[error("webhook {id} not found")]
    WebhookNotFound {
        /// The missing webhook's ID.
        id: WebhookId,
    },

    /// Storage operation failed during delivery.
    #[error("storage error: {message}")]
    Storage {
        /// Storage error message.
        message: String,
    },

    /// Invalid webhook or client configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// Configuration error message.
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a client error from an HTTP response.
    pub fn client_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ClientError { status_code, body: body.into() }
    }

    /// Creates a server error from an HTTP response.
    pub fn server_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ServerError { status_code, body: body.into() }
    }

    /// Creates a rate limit error with retry guidance.
    pub fn rate_limited(retry_after_seconds: u64) -> Self {
        Self::RateLimited { retry_after_seconds }
    }

    /// Creates a circuit open error.
    pub fn circuit_open(last_failure_at: DateTime<Utc>) -> Self {
        Self::CircuitOpen { last_failure_at }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Whether this error represents a transient destination failure.
    ///
    /// Transport failures, timeouts, 5xx responses, rate limits, and the
    /// explicitly retryable 408/429 client statuses qualify. Circuit-open,
    /// other 4xx responses, and local errors do not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::ServerError { .. }
            | Self::RateLimited { .. } => true,

            Self::ClientError { status_code, .. } => matches!(status_code, 408 | 429),

            Self::CircuitOpen { .. }
            | Self::WebhookNotFound { .. }
            | Self::Storage { .. }
            | Self::Configuration { .. } => false,
        }
    }

    /// HTTP status code associated with this error, if a response existed.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ClientError { status_code, .. } | Self::ServerError { status_code, .. } => {
                Some(*status_code)
            },
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Suggested retry delay in seconds, from a Retry-After header.
    ///
    /// `None` means standard exponential backoff applies.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_seconds } => Some(*retry_after_seconds),
            _ => None,
        }
    }
}

impl From<CoreError> for DeliveryError {
    fn from(err: CoreError) -> Self {
        Self::Storage { message: err.to_string() }
    }
}

/// Category of delivery error for metrics and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues.
    Network,
    /// HTTP client errors (4xx).
    Client,
    /// HTTP server errors (5xx).
    Server,
    /// Rate limiting.
    RateLimit,
    /// Circuit breaker protection.
    Circuit,
    /// Storage operations.
    Storage,
    /// Configuration problems.
    Configuration,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::Network { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::ClientError { .. } => Self::Client,
            DeliveryError::ServerError { .. } => Self::Server,
            DeliveryError::RateLimited { .. } => Self::RateLimit,
            DeliveryError::CircuitOpen { .. } => Self::Circuit,
            DeliveryError::Storage { .. } => Self::Storage,
            DeliveryError::WebhookNotFound { .. } | DeliveryError::Configuration { .. } => {
                Self::Configuration
            },
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Circuit => write!(f, "circuit"),
            Self::Storage => write!(f, "storage"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_identified_correctly() {
        assert!(DeliveryError::network("connection refused").is_retryable());
        assert!(DeliveryError::timeout(10).is_retryable());
        assert!(DeliveryError::server_error(503, "unavailable").is_retryable());
        assert!(DeliveryError::rate_limited(60).is_retryable());
        assert!(DeliveryError::client_error(408, "request timeout").is_retryable());

        assert!(!DeliveryError::client_error(404, "not found").is_retryable());
        assert!(!DeliveryError::circuit_open(Utc::now()).is_retryable());
        assert!(!DeliveryError::storage("lock poisoned").is_retryable());
        assert!(!DeliveryError::configuration("invalid URL").is_retryable());
    }

    #[test]
    fn rate_limit_retry_after_extracted() {
        assert_eq!(DeliveryError::rate_limited(120).retry_after_seconds(), Some(120));
        assert_eq!(DeliveryError::timeout(10).retry_after_seconds(), None);
    }

    #[test]
    fn status_codes_surfaced() {
        assert_eq!(DeliveryError::server_error(502, "").status_code(), Some(502));
        assert_eq!(DeliveryError::rate_limited(1).status_code(), Some(429));
        assert_eq!(DeliveryError::network("reset").status_code(), None);
    }

    #[test]
    fn error_categories_mapped_correctly() {
        assert_eq!(ErrorCategory::from(&DeliveryError::network("x")), ErrorCategory::Network);
        assert_eq!(
            ErrorCategory::from(&DeliveryError::client_error(400, "")),
            ErrorCategory::Client
        );
        assert_eq!(
            ErrorCategory::from(&DeliveryError::circuit_open(Utc::now())),
            ErrorCategory::Circuit
        );
    }
}
