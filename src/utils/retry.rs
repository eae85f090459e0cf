//! Retry utilities for fault tolerance
//!
//! Bounded attempts with exponential backoff and an optional overall deadline.
//! The same combinator drives node readiness polling and the short transient
//! retry window of the RPC client.

use std::time::{Duration, Instant};
use tracing::debug;

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,
    /// Initial delay between retries (exponential backoff)
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Overall deadline measured from the first attempt
    pub deadline: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            deadline: None,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            ..Self::default()
        }
    }

    /// Short retry window for connection-refused errors right after a node starts
    pub fn transient() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            deadline: None,
        }
    }

    /// Readiness polling: effectively unbounded attempts, bounded by `deadline`
    pub fn readiness(deadline: Duration) -> Self {
        Self {
            max_attempts: u32::MAX,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            deadline: Some(deadline),
        }
    }

    /// Set the overall deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the maximum delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        std::cmp::min(
            Duration::from_secs_f64(delay.as_secs_f64() * self.backoff_multiplier.max(1.0)),
            self.max_delay,
        )
    }
}

/// Check if an error is retryable (transient failure)
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

/// Why a retry loop gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// The operation returned an error that must not be retried
    Permanent(E),
    /// Attempts or deadline ran out; carries the last error seen
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    /// Unwrap into the underlying error regardless of how the loop ended
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { last, .. } => last,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

/// Retry only if error is retryable
pub fn retry_if_retryable<F, T, E>(config: &RetryConfig, operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Result<T, E>,
    E: IsRetryable + std::fmt::Display,
{
    retry_when(config, |e: &E| e.is_retryable(), operation)
}

/// Retry a blocking operation while `should_retry` approves the error
///
/// Stops on the first success, on the first error rejected by `should_retry`,
/// after `max_attempts`, or once the next sleep would cross the deadline.
pub fn retry_when<F, P, T, E>(
    config: &RetryConfig,
    mut should_retry: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Result<T, E>,
    P: FnMut(&E) -> bool,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let error = match operation() {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !should_retry(&error) {
            return Err(RetryError::Permanent(error));
        }
        if attempt >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: error,
            });
        }
        if let Some(deadline) = config.deadline {
            let elapsed = started.elapsed();
            if elapsed >= deadline {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }
            delay = delay.min(deadline - elapsed);
        }

        debug!(
            "Operation failed (attempt {}/{}): {}. Retrying in {:?}...",
            attempt, max_attempts, error, delay
        );
        std::thread::sleep(delay);
        delay = config.next_delay(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug)]
    struct Flaky(bool);

    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky(retryable={})", self.0)
        }
    }

    impl IsRetryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig::new(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result: Result<u32, Flaky> = retry_if_retryable(&fast(5), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(Flaky(true))
            } else {
                Ok(7)
            }
        })
        .map_err(RetryError::into_inner);
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_permanent_error_is_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry_if_retryable(&fast(5), || {
            calls.set(calls.get() + 1);
            Err(Flaky(false))
        });
        assert!(matches!(result, Err(RetryError::Permanent(_))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_attempts_are_bounded() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry_if_retryable(&fast(4), || {
            calls.set(calls.get() + 1);
            Err(Flaky(true))
        });
        match result {
            Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 4),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn test_deadline_bounds_unlimited_attempts() {
        let config = RetryConfig {
            max_attempts: u32::MAX,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            deadline: Some(Duration::from_millis(150)),
        };
        let started = Instant::now();
        let result: Result<(), _> = retry_if_retryable(&config, || Err(Flaky(true)));
        assert!(result.unwrap_err().is_exhausted());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig::new(3, Duration::from_millis(400))
            .with_max_delay(Duration::from_millis(500));
        assert_eq!(
            config.next_delay(Duration::from_millis(400)),
            Duration::from_millis(500)
        );
    }
}
