/// Retry policy with a fixed backoff and optional jitter
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Number of retries after the first attempt.
///
/// Only "never" and "once" exist: queries retry once, mutations never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Retries {
    Never,
    Once,
}

impl Retries {
    pub fn count(self) -> u32 {
        match self {
            Retries::Never => 0,
            Retries::Once => 1,
        }
    }
}

impl TryFrom<u32> for Retries {
    type Error = RetryConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Retries::Never),
            1 => Ok(Retries::Once),
            other => Err(RetryConfigError::UnsupportedRetries(other)),
        }
    }
}

impl From<Retries> for u32 {
    fn from(value: Retries) -> Self {
        value.count()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RetryConfigError {
    #[error("Unsupported retry count {0}, expected 0 or 1")]
    UnsupportedRetries(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first failed attempt
    pub retries: Retries,
    /// Delay before the retry
    pub backoff: Duration,
    /// Add random jitter to backoff (±30%)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: Retries::Once,
            backoff: Duration::from_millis(1000),
            jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn new(retries: Retries, backoff: Duration) -> Self {
        Self {
            retries,
            backoff,
            jitter: false,
        }
    }

    /// Single attempt, no retry
    pub fn never() -> Self {
        Self::new(Retries::Never, Duration::ZERO)
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Total attempts including the first one
    pub fn max_attempts(&self) -> u32 {
        1 + self.retries.count()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RetryError<E> {
    #[error("Gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// Error returned by the final attempt
    pub fn into_last(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

/// Execute a future, retrying per `config` on failure
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut f: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(attempt, "Retry succeeded");
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= max_attempts {
                    warn!(attempts = attempt, error = %e, "Giving up");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    });
                }

                let delay = calculate_backoff(config.backoff, config.jitter);
                warn!(
                    "Retry attempt {}/{} after error: {}, waiting {:?}",
                    attempt,
                    config.retries.count(),
                    e,
                    delay
                );

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn calculate_backoff(base: Duration, jitter: bool) -> Duration {
    if jitter && !base.is_zero() {
        let mut rng = rand::thread_rng();
        let jitter_factor = 1.0 + rng.gen_range(-0.3..0.3); // ±30%
        Duration::from_millis((base.as_millis() as f64 * jitter_factor) as u64)
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_retry_success_on_first_attempt() {
        let config = RetryConfig::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&config, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_once_recovers() {
        let config = RetryConfig::new(Retries::Once, Duration::from_millis(5));
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&config, move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if count == 0 {
                    Err("temporary error")
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_once_exhausted_keeps_last_error() {
        let config = RetryConfig::new(Retries::Once, Duration::from_millis(5));
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&config, move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move { Err::<i32, _>(format!("failure {}", count)) }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts(), 2);
        assert_eq!(err.into_last(), "failure 1");
        assert_eq!(counter.load(Ordering::SeqCst), 2); // Initial + 1 retry
    }

    #[tokio::test]
    async fn test_never_retries() {
        let config = RetryConfig::never();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&config, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("error") }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_applied_before_retry() {
        let config = RetryConfig::new(Retries::Once, Duration::from_millis(500));
        let start = tokio::time::Instant::now();

        let _ = with_retry(&config, || async { Err::<i32, _>("error") }).await;

        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[test]
    fn test_retries_from_count() {
        assert_eq!(Retries::try_from(0), Ok(Retries::Never));
        assert_eq!(Retries::try_from(1), Ok(Retries::Once));
        assert_eq!(
            Retries::try_from(3),
            Err(RetryConfigError::UnsupportedRetries(3))
        );
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let base = Duration::from_millis(1000);
        for _ in 0..50 {
            let delay = calculate_backoff(base, true);
            assert!(delay >= Duration::from_millis(700));
            assert!(delay <= Duration::from_millis(1300));
        }
        assert_eq!(calculate_backoff(base, false), base);
    }
}
