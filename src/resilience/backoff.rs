//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

use crate::config::RetryConfig;

/// Delay before retry number `attempt` (1-based), capped at `max_ms`, with up
/// to 10% jitter added on top.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponent = (attempt - 1).min(31);
    let capped = base_ms.saturating_mul(1u64 << exponent).min(max_ms);

    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}

/// Backoff for `attempt` using the configured bounds.
pub fn backoff_for(config: &RetryConfig, attempt: u32) -> Duration {
    calculate_backoff(attempt, config.base_delay_ms, config.max_delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_then_caps() {
        assert_eq!(calculate_backoff(0, 100, 2000), Duration::ZERO);

        let first = calculate_backoff(1, 100, 2000).as_millis();
        assert!((100..110).contains(&first));

        let third = calculate_backoff(3, 100, 2000).as_millis();
        assert!((400..440).contains(&third));

        let capped = calculate_backoff(40, 100, 1000).as_millis();
        assert!((1000..1100).contains(&capped));
    }
}
