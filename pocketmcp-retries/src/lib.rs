//! # pocketmcp-retries
//!
//! Bounded retry execution for pocketmcp.
//!
//! The executor runs an async operation up to a fixed number of attempts,
//! sleeping between attempts according to a [`WaitStrategy`]. Only errors
//! that classify themselves as transient via the [`Retryable`] trait are
//! retried; everything else is returned to the caller on first occurrence.
//!
//! ## Example
//!
//! ```ignore
//! use pocketmcp_retries::{with_retry, RetryConfig};
//! use std::time::Duration;
//!
//! let config = RetryConfig::new()
//!     .max_attempts(3)
//!     .linear(Duration::from_secs(1));
//!
//! let result = with_retry(&config, || async {
//!     // Your fallible async operation here
//!     Ok::<_, MyError>(42)
//! }).await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod executor;

pub use config::{RetryConfig, WaitStrategy};
pub use executor::{with_retry, with_retry_state, AttemptInfo, RetryState};

/// Classification of errors into transient and terminal.
///
/// Implemented by error types handed to [`with_retry`]. Transient errors
/// (connection drops, timeouts) are eligible for another attempt; terminal
/// errors (a server's considered answer, malformed input) are returned to
/// the caller immediately.
pub trait Retryable {
    /// Whether a further attempt could plausibly succeed.
    fn is_retryable(&self) -> bool;
}
