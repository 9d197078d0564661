/// Error types for social-client
use query_cache::{CacheKey, FetchError, MutationError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    /// Cached entry does not hold the shape its query produces
    #[error("Unexpected data for {key}: found {found}")]
    UnexpectedShape { key: CacheKey, found: &'static str },
}

/// Result type alias for client operations
pub type ClientResult<T> = Result<T, ClientError>;
