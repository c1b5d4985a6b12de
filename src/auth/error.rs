//! Error taxonomies for the token subsystem
//!
//! Cache conditions (`StoreError`) are recoverable and handled inside the
//! manager; grant conditions (`AuthError`) drive the retry policy and are
//! surfaced to callers when fatal.

use thiserror::Error;

/// Failure to read or write the on-disk token cache.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No cache file exists yet.
    #[error("no cached token found")]
    NotFound,

    /// Cache file exists but does not parse into a credential record.
    #[error("cached token is unreadable: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// Underlying filesystem failure.
    #[error("token cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a grant exchange with the token endpoint.
#[derive(Error, Debug)]
pub enum AuthError {
    /// 400/401 — the request or its credentials were rejected. On a refresh
    /// attempt the manager retries once with the password grant; on a
    /// password attempt this is fatal.
    #[error("credentials rejected ({status}): {message}")]
    CredentialsRejected { status: u16, message: String },

    /// 403/451 — policy-blocked. Never retried.
    #[error("access forbidden ({status}): {message}")]
    Forbidden { status: u16, message: String },

    /// More redirects than the configured limit, or a redirect response
    /// without a Location header.
    #[error("token endpoint redirect limit exceeded")]
    RedirectLoop,

    /// Any other non-success status.
    #[error("token endpoint returned {status}: {body}")]
    Unexpected { status: u16, body: String },

    /// 200 response whose body is not a well-formed grant payload.
    #[error("malformed grant response: {0}")]
    MalformedResponse(#[from] serde_json::Error),

    /// Network-level failure during the exchange.
    #[error("token request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl AuthError {
    /// Whether a refresh-grant failure should fall back to the password grant.
    pub fn retryable_as_password(&self) -> bool {
        matches!(self, AuthError::CredentialsRejected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_is_retryable_as_password() {
        let err = AuthError::CredentialsRejected {
            status: 401,
            message: "invalid_grant".to_string(),
        };
        assert!(err.retryable_as_password());
    }

    #[test]
    fn test_fatal_classes_are_not_retryable() {
        let forbidden = AuthError::Forbidden {
            status: 403,
            message: "blocked".to_string(),
        };
        assert!(!forbidden.retryable_as_password());
        assert!(!AuthError::RedirectLoop.retryable_as_password());
    }
}
