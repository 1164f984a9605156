use crate::errors::ServiceError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Factor to multiply delay by after each attempt
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            ..Default::default()
        }
    }
}

/// Retry policy for determining if an error is retryable
pub trait RetryPolicy<E> {
    fn is_retryable(&self, error: &E) -> bool;
}

/// Retries lost optimistic-lock races and lock contention reported by the database.
pub struct TransientErrorPolicy;

impl RetryPolicy<ServiceError> for TransientErrorPolicy {
    fn is_retryable(&self, error: &ServiceError) -> bool {
        error.is_transient()
    }
}

/// Execute an async function with retries
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    policy: impl RetryPolicy<E>,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!("Operation succeeded after {} attempts", attempts);
                }
                return Ok(result);
            }
            Err(error) => {
                if attempts >= config.max_attempts || !policy.is_retryable(&error) {
                    if attempts > 1 {
                        warn!("Operation failed after {} attempts: {}", attempts, error);
                    }
                    return Err(error);
                }

                warn!(
                    "Attempt {} failed: {}. Retrying in {:?}...",
                    attempts, error, delay
                );

                sleep(delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_factor)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig::new(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let id = Uuid::new_v4();

        let result = with_retry(&fast_config(4), TransientErrorPolicy, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ServiceError::ConcurrentModification(id))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let id = Uuid::new_v4();

        let result: Result<(), _> =
            with_retry(&fast_config(3), TransientErrorPolicy, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::ConcurrentModification(id))
            })
            .await;

        assert!(matches!(result, Err(ServiceError::ConcurrentModification(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn business_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let id = Uuid::new_v4();

        let result: Result<(), _> =
            with_retry(&fast_config(5), TransientErrorPolicy, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::OrderAlreadyFinalized(id))
            })
            .await;

        assert!(matches!(result, Err(ServiceError::OrderAlreadyFinalized(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
