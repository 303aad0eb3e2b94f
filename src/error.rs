// Error handling module
// Defines the error taxonomy shared by the transport, store and coordinator

use std::time::Duration;
use thiserror::Error;

/// Errors raised by a `Transport` while issuing a single request
///
/// Cloneable so one refresh failure can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Server answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Request timed out in the transport
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Connection, body or decode failure
    #[error("Network error ({kind}): {message}")]
    Network { kind: &'static str, message: String },
}

impl TransportError {
    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors from one refresh exchange cycle, delivered to every waiter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefreshError {
    /// Refresh endpoint rejected the refresh token (HTTP 422)
    #[error("Refresh token is invalid or expired: {body}")]
    InvalidRefreshToken { status: u16, body: String },

    /// No refresh token in the credential store
    #[error("No refresh token available")]
    MissingRefreshToken,

    /// Any other exchange failure
    #[error("Refresh exchange failed: {0}")]
    Exchange(TransportError),

    /// Exchange succeeded but the body was unusable
    #[error("Malformed refresh response: {0}")]
    MalformedResponse(String),

    /// Exchange exceeded the configured refresh timeout
    #[error("Refresh exchange timed out after {0:?}")]
    TimedOut(Duration),

    /// New credentials could not be written
    #[error("Failed to store refreshed credentials: {0}")]
    Storage(String),

    /// Refresh task ended without resolving the waiter
    #[error("Refresh task ended without a result")]
    Abandoned,
}

impl RefreshError {
    /// Whether this failure means the stored credentials must be discarded
    pub fn is_invalid_refresh_token(&self) -> bool {
        matches!(self, RefreshError::InvalidRefreshToken { .. })
    }
}

/// Credential store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Credential store lock poisoned")]
    Poisoned,
}

/// Errors surfaced to callers of the coordinator and session
#[derive(Error, Debug)]
pub enum ApiError {
    /// Request failed in the transport and was passed through
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Request was waiting on a refresh that failed
    #[error("Token refresh failed: {0}")]
    Refresh(#[from] RefreshError),

    /// Credential store failure
    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    /// Request validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// HTTP status associated with the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Transport(e) => e.status(),
            ApiError::Refresh(RefreshError::InvalidRefreshToken { status, .. }) => Some(*status),
            ApiError::Refresh(RefreshError::Exchange(e)) => e.status(),
            _ => None,
        }
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ApiError>;
