use crate::clock::Clock;
use crate::config::RetryPolicy;
use crate::error::MessagingError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of a retried operation together with the attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, MessagingError>,
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    pub fn into_result(self) -> Result<T, MessagingError> {
        self.result
    }
}

/// Retry an async operation under a [`RetryPolicy`].
///
/// Each attempt races the operation against `per_attempt_timeout`; a timed
/// out attempt counts as a failure and its future is dropped. Failed attempts
/// are followed by a fixed `inter_attempt_delay`, except the last one.
///
/// The operation receives the 1-based attempt number.
///
/// # Example
/// ```ignore
/// let outcome = retry_with_policy(&RetryPolicy::default(), &TokioClock, "producer", |_| {
///     client.connect()
/// })
/// .await;
/// ```
pub async fn retry_with_policy<C, F, Fut, T>(
    policy: &RetryPolicy,
    clock: &C,
    label: &str,
    operation: F,
) -> RetryOutcome<T>
where
    C: Clock + ?Sized,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, MessagingError>>,
{
    run_attempts(
        policy.max_attempts,
        Some(policy.per_attempt_timeout),
        policy.inter_attempt_delay,
        clock,
        label,
        operation,
    )
    .await
}

/// Retry with a fixed delay and no per-attempt timeout.
pub async fn retry_fixed<C, F, Fut, T>(
    max_attempts: u32,
    delay: Duration,
    clock: &C,
    label: &str,
    operation: F,
) -> RetryOutcome<T>
where
    C: Clock + ?Sized,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, MessagingError>>,
{
    run_attempts(max_attempts, None, delay, clock, label, operation).await
}

async fn run_attempts<C, F, Fut, T>(
    max_attempts: u32,
    timeout: Option<Duration>,
    delay: Duration,
    clock: &C,
    label: &str,
    mut operation: F,
) -> RetryOutcome<T>
where
    C: Clock + ?Sized,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, MessagingError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = match timeout {
            Some(limit) => {
                tokio::select! {
                    biased;
                    result = operation(attempt) => result,
                    _ = clock.sleep(limit) => Err(MessagingError::Timeout(limit)),
                }
            }
            None => operation(attempt).await,
        };

        match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(label, attempt, "Operation succeeded after retries");
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) if attempt >= max_attempts => {
                warn!(label, attempts = attempt, error = %e, "Operation failed, attempts exhausted");
                return RetryOutcome {
                    result: Err(e),
                    attempts: attempt,
                };
            }
            Err(e) => {
                warn!(
                    label,
                    attempt,
                    max_attempts,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Attempt failed, retrying"
                );
                clock.sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{RecordingClock, TokioClock};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_secs(5), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let clock = RecordingClock::new();

        let outcome = retry_with_policy(&policy(3), &clock, "test", |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, MessagingError>("connected")
            }
        })
        .await;

        assert_eq!(outcome.result.unwrap(), "connected");
        assert_eq!(outcome.attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let clock = RecordingClock::new();

        let outcome = retry_with_policy(&policy(3), &clock, "test", |attempt| async move {
            if attempt < 3 {
                Err(MessagingError::connection(format!("refused #{attempt}")))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.into_result().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_fixed_delay_between_attempts_only() {
        let clock = RecordingClock::new();

        let outcome = retry_with_policy(&policy(3), &clock, "test", |_| async {
            Err::<(), _>(MessagingError::connection("refused"))
        })
        .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 3);

        // Attempts settle before their timeout is polled, so only delays are recorded.
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5); 2]);
    }

    #[tokio::test]
    async fn test_retry_fixed_exhausts() {
        let clock = RecordingClock::new();
        let counter = Arc::new(AtomicU32::new(0));

        let outcome = retry_fixed(3, Duration::from_secs(5), &clock, "subscribe", |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(MessagingError::subscribe("orders", "not connected"))
            }
        })
        .await;

        assert!(matches!(outcome.result, Err(MessagingError::Subscribe { .. })));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5); 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_attempt_times_out() {
        let start = tokio::time::Instant::now();

        let outcome = retry_with_policy(&policy(2), &TokioClock, "test", |_| async {
            std::future::pending::<Result<(), MessagingError>>().await
        })
        .await;

        assert!(matches!(outcome.result, Err(MessagingError::Timeout(_))));
        assert_eq!(outcome.attempts, 2);
        // timeout + delay + timeout
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_zero_attempts_runs_once() {
        let clock = RecordingClock::new();
        let outcome = retry_fixed(0, Duration::ZERO, &clock, "test", |_| async {
            Err::<(), _>(MessagingError::Closed)
        })
        .await;

        assert_eq!(outcome.attempts, 1);
    }
}
