//! Error Types
//!
//! Two layers of failure exist in the engine:
//!
//! - [`UpstreamError`]: a single adapter call failed (transport, auth, rate
//!   limit, timeout). It triggers failover and is never surfaced on its own
//!   unless every adapter failed.
//! - [`ConductorError`]: the caller-visible taxonomy returned from the
//!   orchestrator surface.
//!
//! Malformed scoring or enhancement output is not an error anywhere in this
//! crate; it downgrades to a tagged default (see [`crate::quality`]).

use std::fmt;

use thiserror::Error;

// =============================================================================
// Upstream (single adapter) failures
// =============================================================================

/// Failure of one adapter call
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// Could not reach the provider
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Provider answered with a non-success status
    #[error("request failed with status {status}: {body}")]
    RequestFailed {
        /// HTTP status code
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// Credential rejected
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Provider throttled the request
    #[error("rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited {
        /// Suggested wait before retrying, if the provider sent one
        retry_after_ms: Option<u64>,
    },

    /// Call exceeded its time bound
    #[error("request timed out")]
    Timeout,

    /// Body could not be decoded into the expected shape
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Adapter has no credential
    #[error("provider not configured")]
    NotConfigured,
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::ConnectionFailed(err.to_string())
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            Self::RequestFailed {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            Self::ConnectionFailed(err.to_string())
        }
    }
}

// =============================================================================
// Caller-visible errors
// =============================================================================

/// One failed attempt recorded during failover
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderFailure {
    /// Adapter name
    pub provider: String,
    /// What went wrong
    pub error: UpstreamError,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}

/// Errors surfaced by the orchestrator and pipeline
#[derive(Clone, Debug, Error)]
pub enum ConductorError {
    /// No adapter has a credential. Fatal and never retried.
    #[error("no AI providers configured")]
    NoProviderConfigured,

    /// Every attempted adapter failed
    ///
    /// `source` is the diagnostic error for the operation: the first failure
    /// for the enhancement loop, the last one for plain failover. `attempts`
    /// keeps every failure in the order it happened.
    #[error("all providers failed: {source}")]
    AllProvidersFailed {
        /// Diagnostic error
        #[source]
        source: UpstreamError,
        /// Every failed attempt, oldest first
        attempts: Vec<ProviderFailure>,
    },

    /// Cache parameters could not be serialized into a stable key
    #[error("invalid cache key: {0}")]
    InvalidCacheKey(String),
}

impl ConductorError {
    /// Process exit status for this error
    ///
    /// Missing configuration gets its own status so callers can prompt for
    /// provider credentials instead of reporting a generic failure.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoProviderConfigured => 3,
            Self::AllProvidersFailed { .. } => 2,
            Self::InvalidCacheKey(_) => 1,
        }
    }

    /// Whether the error means "no provider is set up"
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::NoProviderConfigured)
    }

    /// Failed attempts carried by this error, oldest first
    #[must_use]
    pub fn attempts(&self) -> &[ProviderFailure] {
        match self {
            Self::AllProvidersFailed { attempts, .. } => attempts,
            _ => &[],
        }
    }
}
