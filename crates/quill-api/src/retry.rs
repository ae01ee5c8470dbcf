//! Retry with exponential backoff for API requests.

use quill_types::ApiError;
use rand::Rng;

/// Fraction of the computed delay added or removed at random.
const JITTER: f64 = 0.25;

/// Configuration for retry behavior on transient API errors.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries).
    pub max_retries: u32,
    /// Delay in milliseconds before the first retry.
    pub initial_delay_ms: u64,
    /// Upper bound in milliseconds for any single delay.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each attempt.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Fail on the first error.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Whether a failed request may succeed if sent again unchanged.
pub fn is_retryable(error: &ApiError) -> bool {
    match error {
        ApiError::RateLimited { .. }
        | ApiError::Overloaded
        | ApiError::Server { .. }
        | ApiError::Network(_)
        | ApiError::Timeout => true,
        ApiError::Auth { .. } | ApiError::BadRequest { .. } | ApiError::StreamParse(_) => false,
    }
}

/// Milliseconds to wait before retry number `attempt` (0-based).
///
/// A server-provided `Retry-After` wins, capped at `max_delay_ms`. Otherwise
/// `initial_delay_ms * backoff_factor^attempt`, capped, then jittered by ±25%.
pub fn calculate_delay(config: &RetryConfig, attempt: u32, retry_after_ms: Option<u64>) -> u64 {
    if let Some(server_delay) = retry_after_ms {
        return server_delay.min(config.max_delay_ms);
    }

    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = (config.initial_delay_ms as f64 * config.backoff_factor.powi(exponent))
        .min(config.max_delay_ms as f64);
    let factor = rand::rng().random_range((1.0 - JITTER)..=(1.0 + JITTER));
    ((base * factor) as u64).min(config.max_delay_ms)
}
