/// Retry policy for remote calls issued by the client cache
///
/// Query fetches are retried at most once; mutations are never retried.
/// The policy is explicit configuration rather than a library default:
///
/// ```rust,no_run
/// use resilience::{with_retry, Retries, RetryConfig};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let config = RetryConfig::new(Retries::Once, Duration::from_millis(250));
///
///     let result = with_retry(&config, || async {
///         // Your remote call here
///         Ok::<_, String>(())
///     })
///     .await;
///     assert!(result.is_ok());
/// }
/// ```

pub mod retry;

pub use retry::{with_retry, Retries, RetryConfig, RetryConfigError, RetryError};
