//! TableShift Core Resilience: retry and cancellation primitives
//!
//! # Overview
//!
//! Long-running migrations talk to remote systems that fail transiently
//! (leaders being elected, replicas restarting, scanners timing out). This
//! crate provides the building blocks to keep going through those failures
//! without losing control of the run:
//!
//! - **Retry Policy**: fixed, linear or exponential backoff with optional
//!   jitter and an optional attempt cap
//! - **Cancellation Token**: a shared stop signal with an optional deadline,
//!   checked between attempts and during every backoff sleep
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Clusters, tables or scanners
//! - Coordination services
//! - Application-specific error types (callers implement [`Retryable`])
//!
//! # Usage Example
//!
//! ```
//! use tableshift_core_resilience::{CancellationToken, RetryPolicy, Retryable};
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct Flaky;
//!
//! impl std::fmt::Display for Flaky {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "flaky")
//!     }
//! }
//!
//! impl Retryable for Flaky {
//!     fn is_retryable(&self) -> bool {
//!         true
//!     }
//! }
//!
//! let policy = RetryPolicy::fixed(Duration::from_millis(1));
//! let token = CancellationToken::new();
//!
//! let mut calls = 0;
//! let outcome = policy
//!     .run(&token, "demo", |_attempt| {
//!         calls += 1;
//!         if calls < 3 { Err(Flaky) } else { Ok(calls) }
//!     })
//!     .unwrap();
//!
//! assert_eq!(outcome.value, 3);
//! assert_eq!(outcome.retries, 2);
//! ```

pub mod cancel;
pub mod error;
pub mod retry;

pub use cancel::CancellationToken;
pub use error::RetryError;
pub use retry::{BackoffStrategy, Retried, RetryPolicy, Retryable};
