//! Retry configuration.

use std::time::Duration;

/// Configuration for retry behavior.
///
/// `max_attempts` counts every try, including the first one: a value of 3
/// means one initial attempt plus up to two retries. A value of 0 is
/// treated as 1.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, first attempt included.
    pub max_attempts: u32,
    /// Wait strategy between attempts.
    pub wait: WaitStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            wait: WaitStrategy::Linear {
                base: Duration::from_secs(1),
            },
        }
    }
}

impl RetryConfig {
    /// Create a new default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of attempts.
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set the wait strategy.
    pub fn wait(mut self, strategy: WaitStrategy) -> Self {
        self.wait = strategy;
        self
    }

    /// Use linear backoff: the delay before attempt `k` is `base * k`.
    pub fn linear(mut self, base: Duration) -> Self {
        self.wait = WaitStrategy::Linear { base };
        self
    }

    /// Use a fixed delay between attempts.
    pub fn fixed(mut self, delay: Duration) -> Self {
        self.wait = WaitStrategy::Fixed(delay);
        self
    }

    /// Use exponential backoff.
    pub fn exponential(mut self, initial: Duration, max: Duration) -> Self {
        self.wait = WaitStrategy::Exponential {
            initial,
            max,
            multiplier: 2.0,
            jitter: 0.0,
        };
        self
    }

    /// Use exponential backoff with jitter.
    pub fn exponential_jitter(mut self, initial: Duration, max: Duration, jitter: f64) -> Self {
        self.wait = WaitStrategy::Exponential {
            initial,
            max,
            multiplier: 2.0,
            jitter,
        };
        self
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self::new().max_attempts(1)
    }
}

/// Strategy for waiting between attempts.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// No waiting.
    None,
    /// Fixed delay.
    Fixed(Duration),
    /// Linear backoff: the delay before attempt `k` (1-indexed) is `base * k`.
    Linear {
        /// Base delay.
        base: Duration,
    },
    /// Exponential backoff with optional jitter.
    Exponential {
        /// Initial delay, used before the second attempt.
        initial: Duration,
        /// Maximum delay.
        max: Duration,
        /// Multiplier for each further attempt.
        multiplier: f64,
        /// Jitter factor (0.0 disables jitter).
        jitter: f64,
    },
}

impl WaitStrategy {
    /// Calculate the wait after `failed_attempt` (1-indexed) has failed,
    /// i.e. the delay before attempt `failed_attempt + 1`.
    pub fn calculate(&self, failed_attempt: u32) -> Duration {
        match self {
            WaitStrategy::None => Duration::ZERO,
            WaitStrategy::Fixed(d) => *d,
            WaitStrategy::Linear { base } => *base * (failed_attempt + 1),
            WaitStrategy::Exponential {
                initial,
                max,
                multiplier,
                jitter,
            } => {
                let base =
                    initial.as_secs_f64() * multiplier.powi(failed_attempt.saturating_sub(1) as i32);
                let jitter_amount = base * jitter * random_jitter();
                let delay = (base + jitter_amount).min(max.as_secs_f64());
                Duration::from_secs_f64(delay.max(0.0))
            }
        }
    }
}

/// Generate a random jitter factor between -1.0 and 1.0.
fn random_jitter() -> f64 {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    rng.gen_range(-1.0..1.0)
}
