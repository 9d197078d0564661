//! Cache error types

use crate::keys::CacheKey;
use crate::mutation::MutationKind;
use thiserror::Error;

/// Category of a remote failure, used to pick the user-facing message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Transport failure or backend not reachable
    Unavailable,
    Timeout,
    /// Caller has no identity or lacks permission
    Unauthorized,
    /// Action already applied on the server (e.g. already liked)
    Conflict,
    NotFound,
    /// Backend refused the call for an application reason
    Rejected,
}

/// Failure reported by the remote operation interface
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind:?}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unavailable, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unauthorized, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Conflict, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Rejected, message)
    }
}

/// Query failed after exhausting its retry
#[derive(Error, Debug, Clone)]
#[error("Fetch of {key} failed after {attempts} attempt(s): {source}")]
pub struct FetchError {
    pub key: CacheKey,
    pub attempts: u32,
    #[source]
    pub source: RemoteError,
}

/// Mutation rejected before anything was applied to the cache
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Idempotence guard already holds the requested state
    #[error("{scope} already applied for {target}")]
    AlreadyApplied { scope: &'static str, target: String },

    /// Caller-supplied payload is invalid
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Optimistic update could not be computed from the current entry value
    #[error("Optimistic update for {key} rejected: {reason}")]
    UpdateRejected { key: CacheKey, reason: String },
}

/// Outcome error of `mutate`
#[derive(Error, Debug, Clone)]
pub enum MutationError {
    #[error("Mutation rejected: {0}")]
    Rejected(#[from] ValidationError),

    #[error("{kind} failed: {source}")]
    Remote {
        kind: MutationKind,
        #[source]
        source: RemoteError,
    },
}

impl MutationError {
    pub fn remote_kind(&self) -> Option<RemoteErrorKind> {
        match self {
            MutationError::Remote { source, .. } => Some(source.kind),
            MutationError::Rejected(_) => None,
        }
    }
}

/// Configuration error
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {reason}")]
    InvalidVar { var: &'static str, reason: String },

    #[error(transparent)]
    Retry(#[from] resilience::RetryConfigError),
}

pub type FetchResult<T> = Result<T, FetchError>;
pub type MutationResult<T> = Result<T, MutationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RemoteError::conflict("already liked");
        assert_eq!(err.to_string(), "Conflict: already liked");

        let err = ValidationError::AlreadyApplied {
            scope: "liked",
            target: "7".to_string(),
        };
        assert_eq!(err.to_string(), "liked already applied for 7");
    }

    #[test]
    fn test_mutation_error_kind() {
        let err = MutationError::Remote {
            kind: MutationKind::Like,
            source: RemoteError::unavailable("connection reset"),
        };
        assert_eq!(err.remote_kind(), Some(RemoteErrorKind::Unavailable));

        let err: MutationError = ValidationError::InvalidPayload("empty".into()).into();
        assert_eq!(err.remote_kind(), None);
    }
}
