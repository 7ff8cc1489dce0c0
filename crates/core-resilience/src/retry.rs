//! Retry policy with configurable backoff
//!
//! A [`RetryPolicy`] drives an operation until it succeeds, returns an error
//! that is not worth retrying, exhausts its attempt cap, or the supplied
//! [`CancellationToken`] fires. With no attempt cap the policy retries for as
//! long as the token allows, which is what offline bulk migrations want: keep
//! going through transient failures, but stay stoppable.

use std::fmt;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::cancel::CancellationToken;
use crate::error::RetryError;

/// Classifies an error as worth retrying or not.
pub trait Retryable {
    /// `true` if the same call may succeed when repeated later
    fn is_retryable(&self) -> bool;
}

/// Backoff strategy for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// Same delay between every attempt
    #[default]
    Fixed,

    /// Delay grows by `initial_delay` per retry
    Linear,

    /// Delay doubles per retry
    Exponential,
}

/// How, and for how long, a failing operation is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Upper bound for any single delay (before jitter)
    pub max_delay: Duration,

    /// How the delay grows between retries
    pub backoff: BackoffStrategy,

    /// Total attempts allowed; `None` retries until cancelled
    pub max_attempts: Option<u32>,

    /// Random extra delay as a fraction of the computed delay (0.0 disables)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(10))
    }
}

/// A value produced by a retried operation, with the number of retries it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub retries: u32,
}

impl RetryPolicy {
    /// Fixed delay, unbounded attempts
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            backoff: BackoffStrategy::Fixed,
            max_attempts: None,
            jitter_factor: 0.0,
        }
    }

    /// Cap the total number of attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    /// Calculate the delay that precedes retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        let base = match self.backoff {
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Linear => self.initial_delay.saturating_mul(retry),
            BackoffStrategy::Exponential => self
                .initial_delay
                .saturating_mul(2_u32.saturating_pow(retry - 1)),
        };
        let capped = base.min(self.max_delay.max(self.initial_delay));

        if self.jitter_factor.is_finite() && self.jitter_factor > 0.0 {
            let jitter = rand::rng().random_range(0.0..self.jitter_factor);
            let extra = Duration::try_from_secs_f64(capped.as_secs_f64() * jitter)
                .unwrap_or(Duration::MAX);
            capped.saturating_add(extra)
        } else {
            capped
        }
    }

    /// Run `op` under this policy.
    ///
    /// `op` receives the 1-based attempt number. Every failed attempt that is
    /// followed by another one logs exactly one warning.
    pub fn run<T, E, F>(
        &self,
        token: &CancellationToken,
        operation: &str,
        mut op: F,
    ) -> Result<Retried<T>, RetryError<E>>
    where
        E: Retryable + fmt::Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        let mut attempt: u32 = 1;
        loop {
            if token.is_cancelled() {
                return Err(RetryError::Cancelled {
                    operation: operation.to_string(),
                    attempts: attempt - 1,
                });
            }

            let error = match op(attempt) {
                Ok(value) => {
                    return Ok(Retried {
                        value,
                        retries: attempt - 1,
                    })
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                return Err(RetryError::Fatal {
                    operation: operation.to_string(),
                    error,
                });
            }

            if matches!(self.max_attempts, Some(max) if attempt >= max) {
                return Err(RetryError::Exhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last_error: error,
                });
            }

            let delay = self.delay_for(attempt);
            warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "operation failed, retrying"
            );

            if !token.sleep(delay) {
                return Err(RetryError::Cancelled {
                    operation: operation.to_string(),
                    attempts: attempt,
                });
            }
            attempt = attempt.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient"),
                TestError::Permanent => write!(f, "permanent"),
            }
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn quick() -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(1))
    }

    #[test]
    fn test_success_without_retry() {
        let token = CancellationToken::new();
        let outcome = quick()
            .run(&token, "op", |_| Ok::<_, TestError>(7))
            .unwrap();
        assert_eq!(outcome, Retried { value: 7, retries: 0 });
    }

    #[test]
    fn test_transient_failures_are_retried_until_success() {
        let token = CancellationToken::new();
        let mut seen = Vec::new();
        let outcome = quick()
            .run(&token, "op", |attempt| {
                seen.push(attempt);
                if attempt <= 4 {
                    Err(TestError::Transient)
                } else {
                    Ok("done")
                }
            })
            .unwrap();

        assert_eq!(outcome.value, "done");
        assert_eq!(outcome.retries, 4);
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[derive(Clone, Default)]
    struct Capture(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_one_warning_per_retry() {
        let capture = Capture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_ansi(false)
            .finish();

        let outcome = tracing::subscriber::with_default(subscriber, || {
            let token = CancellationToken::new();
            quick().run(&token, "set", |attempt| {
                if attempt <= 3 {
                    Err(TestError::Transient)
                } else {
                    Ok(())
                }
            })
        })
        .unwrap();

        let logs = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert_eq!(outcome.retries, 3);
        assert_eq!(logs.matches("operation failed, retrying").count(), 3);
    }

    #[test]
    fn test_permanent_error_is_not_retried() {
        let token = CancellationToken::new();
        let mut calls = 0;
        let err = quick()
            .run(&token, "scan", |_| {
                calls += 1;
                Err::<(), _>(TestError::Permanent)
            })
            .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(
            err,
            RetryError::Fatal { error: TestError::Permanent, .. }
        ));
        assert_eq!(err.operation(), "scan");
    }

    #[test]
    fn test_attempt_cap_exhausts() {
        let token = CancellationToken::new();
        let err = quick()
            .with_max_attempts(3)
            .run(&token, "op", |_| Err::<(), _>(TestError::Transient))
            .unwrap_err();

        match err {
            RetryError::Exhausted { attempts, last_error, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error, TestError::Transient);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_cancelled_token_stops_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let mut calls = 0;
        let err = quick()
            .run(&token, "op", |_| {
                calls += 1;
                Ok::<_, TestError>(())
            })
            .unwrap_err();

        assert_eq!(calls, 0);
        assert!(err.is_cancelled());
        assert!(err.into_inner().is_none());
    }

    #[test]
    fn test_cancel_during_backoff() {
        let token = CancellationToken::new();
        let handle = token.clone();
        let policy = RetryPolicy::fixed(Duration::from_secs(60));

        let err = policy
            .run(&token, "op", |_| {
                handle.cancel();
                Err::<(), _>(TestError::Transient)
            })
            .unwrap_err();

        match err {
            RetryError::Cancelled { attempts, .. } => assert_eq!(attempts, 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::fixed(Duration::from_secs(10));
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(50), Duration::from_secs(10));
    }

    #[test]
    fn test_linear_and_exponential_delays_are_capped() {
        let linear = RetryPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
            backoff: BackoffStrategy::Linear,
            ..RetryPolicy::default()
        };
        assert_eq!(linear.delay_for(2), Duration::from_secs(2));
        assert_eq!(linear.delay_for(9), Duration::from_secs(3));

        let exponential = RetryPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff: BackoffStrategy::Exponential,
            ..RetryPolicy::default()
        };
        assert_eq!(exponential.delay_for(1), Duration::from_secs(1));
        assert_eq!(exponential.delay_for(4), Duration::from_secs(8));
        assert_eq!(exponential.delay_for(40), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_within_factor() {
        let policy = RetryPolicy {
            jitter_factor: 0.5,
            ..RetryPolicy::fixed(Duration::from_millis(100))
        };
        for retry in 1..20 {
            let delay = policy.delay_for(retry);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_non_finite_jitter_is_ignored() {
        for factor in [f64::INFINITY, f64::NAN] {
            let policy = RetryPolicy {
                jitter_factor: factor,
                ..RetryPolicy::fixed(Duration::from_millis(100))
            };
            assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        }
    }
}
