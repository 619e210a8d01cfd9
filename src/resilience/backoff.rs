//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Delay before retry number `attempt` (1-based); zero before the first call.
///
/// `base_delay_ms · 2^(attempt-1)`, capped at `max_delay_ms`, plus up to a
/// tenth of that as jitter so retries from many requests spread out.
pub fn backoff_for(attempt: u32, config: &RetryConfig) -> Duration {
    let Some(exponent) = attempt.checked_sub(1) else {
        return Duration::ZERO;
    };
    let delay_ms = config
        .base_delay_ms
        .checked_shl(exponent)
        .filter(|ms| ms >> exponent == config.base_delay_ms)
        .map_or(config.max_delay_ms, |ms| ms.min(config.max_delay_ms));

    let jitter_ms = match delay_ms / 10 {
        0 => 0,
        spread => rand::thread_rng().gen_range(0..spread),
    };
    Duration::from_millis(delay_ms + jitter_ms)
}
