//! Retry executor for running operations with bounded retries.

use crate::config::RetryConfig;
use crate::Retryable;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// State accumulated across retry attempts.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Number of attempts made so far (1-indexed after the first).
    pub attempts: u32,
    /// Total time spent waiting between attempts.
    pub total_wait: Duration,
    /// History of attempts.
    pub history: Vec<AttemptInfo>,
}

/// Information about a single attempt.
#[derive(Debug, Clone)]
pub struct AttemptInfo {
    /// Attempt number (1-indexed).
    pub attempt: u32,
    /// Whether it succeeded.
    pub success: bool,
    /// Error message if it failed.
    pub error: Option<String>,
    /// Time waited after this attempt before the next one.
    pub wait: Duration,
}

/// Execute an operation with bounded retries.
///
/// The operation is attempted up to `config.max_attempts` times. Errors for
/// which [`Retryable::is_retryable`] returns `false` are returned
/// immediately; on exhausting the budget the last observed error is
/// returned. The first success short-circuits.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    with_retry_state(config, operation).await.0
}

/// Execute with retries and return the accumulated attempt history.
pub async fn with_retry_state<F, Fut, T, E>(
    config: &RetryConfig,
    operation: F,
) -> (Result<T, E>, RetryState)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut state = RetryState::default();
    let max_attempts = config.max_attempts.max(1);

    loop {
        state.attempts += 1;

        debug!(attempt = state.attempts, max_attempts, "executing attempt");

        match operation().await {
            Ok(result) => {
                state.history.push(AttemptInfo {
                    attempt: state.attempts,
                    success: true,
                    error: None,
                    wait: Duration::ZERO,
                });
                return (Ok(result), state);
            }
            Err(error) => {
                if state.attempts >= max_attempts || !error.is_retryable() {
                    warn!(
                        attempt = state.attempts,
                        error = %error,
                        "attempts exhausted or error not retryable"
                    );
                    state.history.push(AttemptInfo {
                        attempt: state.attempts,
                        success: false,
                        error: Some(error.to_string()),
                        wait: Duration::ZERO,
                    });
                    return (Err(error), state);
                }

                let wait = config.wait.calculate(state.attempts);
                state.total_wait += wait;
                state.history.push(AttemptInfo {
                    attempt: state.attempts,
                    success: false,
                    error: Some(error.to_string()),
                    wait,
                });

                debug!(
                    attempt = state.attempts,
                    wait_ms = wait.as_millis(),
                    error = %error,
                    "waiting before next attempt"
                );

                sleep(wait).await;
            }
        }
    }
}
