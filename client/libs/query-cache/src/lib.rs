//! Client-side query cache with optimistic mutations
//!
//! Keeps the results of remote queries keyed by structured [`CacheKey`]s and
//! runs user actions against them:
//! - Read-through queries with in-flight deduplication and one retry
//! - Optimistic updates applied atomically with a snapshot for rollback
//! - Idempotence guards for actions that must apply at most once
//! - Prefix or exact invalidation with background refetch
//! - Metrics integration

mod cache;
mod config;
mod entry;
mod error;
mod keys;
mod metrics;
mod mutation;
mod notify;

pub use cache::{PendingMutation, QueryCache, QueryFetcher};
pub use config::CacheConfig;
pub use entry::CacheEntry;
pub use error::{
    ConfigError, FetchError, FetchResult, MutationError, MutationResult, RemoteError,
    RemoteErrorKind, ValidationError,
};
pub use keys::{CacheKey, KeySegment, KeySelector};
pub use metrics::CacheMetrics;
pub use mutation::{
    Guard, MutationKind, MutationRequest, MutationState, OptimisticUpdate, RemoteCall,
};
pub use notify::{Notification, NotificationQueue, NotificationSink, NotifyLevel, TracingSink};

/// Retry policy types used by [`CacheConfig`]
pub use resilience::{Retries, RetryConfig};
