//! Shared cancellation signal with an optional deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep slice; bounds how late a cancellation is noticed.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Shared cancellation token that retry loops check between attempts.
///
/// Clones share the same flag, so an operator-facing handle (signal handler,
/// supervisor thread) can stop a migration that is blocked in a retry loop.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    /// Create a new non-cancelled token without a deadline.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// Create a token that reports cancellation once `timeout` has elapsed.
    ///
    /// A timeout too large to represent as an instant means no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if cancellation has been requested or the deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return true;
        }
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }

    /// The configured deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Sleep for `duration`, waking early if the token is cancelled.
    ///
    /// Returns `false` when the sleep was cut short by cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        // None: the sleep only ends on cancellation
        let until = Instant::now().checked_add(duration);
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            let remaining = match until {
                Some(until) if now >= until => return true,
                Some(until) => until - now,
                None => SLEEP_SLICE,
            };
            thread::sleep(remaining.min(SLEEP_SLICE));
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_token_is_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.deadline().is_none());
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancellationToken::new();
        let handle = token.clone();
        handle.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_elapsed_deadline_cancels() {
        let token = CancellationToken::with_timeout(Duration::ZERO);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_unrepresentable_timeout_has_no_deadline() {
        let token = CancellationToken::with_timeout(Duration::from_secs(u64::MAX));
        assert!(token.deadline().is_none());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_sleep_completes_when_not_cancelled() {
        let token = CancellationToken::new();
        assert!(token.sleep(Duration::from_millis(5)));
    }

    #[test]
    fn test_sleep_returns_early_on_cancel() {
        let token = CancellationToken::new();
        let handle = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.cancel();
        });

        let start = Instant::now();
        let completed = token.sleep(Duration::from_secs(30));
        canceller.join().unwrap();

        assert!(!completed);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
