//! Error types for the roster reconciliation core.

use thiserror::Error;

/// Errors surfaced by the batching bridge's HTTP delivery path.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("timeout")]
    Timeout,

    #[error("rate limited")]
    RateLimited,

    #[error("server error: {status}")]
    ServerError { status: u16 },

    #[error("bad request: {status} - {message}")]
    BadRequest { status: u16, message: String },

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl BridgeError {
    /// Whether this error is retryable per the taxonomy in §7: 5xx, 429, and
    /// network/timeout are transient; everything else is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::Network(_)
                | BridgeError::Timeout
                | BridgeError::RateLimited
                | BridgeError::ServerError { .. }
        )
    }

    /// Classify an HTTP status into an error, or `None` if it should be
    /// treated as success (2xx, and 409 as idempotent duplicate).
    pub fn from_status(status: u16, message: String) -> Option<Self> {
        match status {
            200..=299 | 409 => None,
            429 => Some(BridgeError::RateLimited),
            s if s >= 500 => Some(BridgeError::ServerError { status: s }),
            s => Some(BridgeError::BadRequest { status: s, message }),
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BridgeError::Timeout
        } else {
            BridgeError::Network(err)
        }
    }
}

/// Errors from the document store contract (§6.3).
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store conflict: {0}")]
    Conflict(String),
}

/// Errors from a reconciler invocation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("circuit open, retry after reset window")]
    CircuitOpen,

    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Errors from the finalizer sweep.
#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Fatal configuration errors. Per the "Fatal" taxonomy entry these should
/// only occur at process startup and lead to a non-zero exit.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("invalid value for environment variable {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
}
