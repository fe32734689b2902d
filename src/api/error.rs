//! Error types for the API client.
//!
//! Each variant carries the URL it failed on so log lines and the final run
//! summary point at the exact request. Whether an error ends the run or only
//! skips one document is decided by [`ApiError::is_run_fatal`].

use thiserror::Error;

/// Errors returned by the HTTP executor before any status code is available.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The request did not complete within its timeout.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Connection-level failure (DNS, refused connection, reset, TLS).
    #[error("network error requesting {url}: {message}")]
    Network {
        /// The URL that failed.
        url: String,
        /// Description of the underlying failure.
        message: String,
    },

    /// The URL could not be parsed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The malformed URL.
        url: String,
    },
}

impl TransportError {
    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a network error.
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }
}

/// Errors that can occur while talking to the content API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Credentials were rejected (HTTP 401). Never retried.
    #[error("[AUTH] access token rejected (HTTP {status}) requesting {url}\n  Suggestion: check ESA_ACCESS_TOKEN and its read scope")]
    Auth {
        /// The URL that rejected the token.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The server kept answering 429 after the backoff cap was reached.
    #[error("rate limit still in effect after {attempts} attempts requesting {url}")]
    RateLimitExceeded {
        /// The rate-limited URL.
        url: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// Network failures or 5xx responses persisted through every retry.
    #[error("transient failure persisted after {attempts} attempts requesting {url}: {detail}")]
    Transient {
        /// The URL that kept failing.
        url: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last observed failure.
        detail: String,
    },

    /// The resource no longer exists or is not visible (HTTP 403/404).
    #[error("not found (HTTP {status}): {url}")]
    NotFound {
        /// The missing resource URL.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Any other non-retryable HTTP status.
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The response body did not have the expected shape.
    #[error("unexpected response from {url}: {detail}")]
    Protocol {
        /// The URL whose response could not be parsed.
        url: String,
        /// Parser diagnostics.
        detail: String,
    },

    /// The query could not be built or sent (bad team name, page 0, bad URL).
    #[error("invalid query: {reason}")]
    InvalidQuery {
        /// Why the query was rejected.
        reason: String,
    },

    /// The underlying HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    Client {
        /// The reqwest builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl ApiError {
    /// Creates an authentication error.
    pub fn auth(url: impl Into<String>, status: u16) -> Self {
        Self::Auth {
            url: url.into(),
            status,
        }
    }

    /// Creates a not-found error.
    pub fn not_found(url: impl Into<String>, status: u16) -> Self {
        Self::NotFound {
            url: url.into(),
            status,
        }
    }

    /// Creates a generic HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a protocol (response shape) error.
    pub fn protocol(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Protocol {
            url: url.into(),
            detail: detail.into(),
        }
    }

    /// Creates an invalid query error.
    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery {
            reason: reason.into(),
        }
    }

    /// Returns true when the error must stop the whole run rather than one item.
    #[must_use]
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            Self::Auth { .. }
                | Self::RateLimitExceeded { .. }
                | Self::InvalidQuery { .. }
                | Self::Client { .. }
        )
    }

    /// Returns true for errors that mean the item is gone for this run.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_display_has_prefix_and_hint() {
        let error = ApiError::auth("https://api.esa.io/v1/teams/docs/posts", 401);
        let msg = error.to_string();
        assert!(msg.starts_with("[AUTH]"), "Expected [AUTH] prefix in: {msg}");
        assert!(msg.contains("401"), "Expected status in: {msg}");
        assert!(msg.contains("ESA_ACCESS_TOKEN"), "Expected hint in: {msg}");
    }

    #[test]
    fn test_run_fatal_classification() {
        assert!(ApiError::auth("u", 401).is_run_fatal());
        assert!(
            ApiError::RateLimitExceeded {
                url: "u".into(),
                attempts: 5
            }
            .is_run_fatal()
        );
        assert!(ApiError::invalid_query("empty team").is_run_fatal());

        assert!(!ApiError::not_found("u", 404).is_run_fatal());
        assert!(!ApiError::http_status("u", 400).is_run_fatal());
        assert!(!ApiError::protocol("u", "missing field").is_run_fatal());
        assert!(
            !ApiError::Transient {
                url: "u".into(),
                attempts: 3,
                detail: "HTTP 503".into()
            }
            .is_run_fatal()
        );
    }

    #[test]
    fn test_not_found_display() {
        let error = ApiError::not_found("https://api.esa.io/v1/teams/docs/posts/42", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected status in: {msg}");
        assert!(msg.contains("/posts/42"), "Expected URL in: {msg}");
        assert!(error.is_not_found());
    }

    #[test]
    fn test_transport_error_display() {
        let error = TransportError::network("https://img.esa.io/a.png", "connection refused");
        let msg = error.to_string();
        assert!(msg.contains("connection refused"));
        assert!(msg.contains("img.esa.io"));
        assert!(TransportError::timeout("x").to_string().contains("timeout"));
    }
}
