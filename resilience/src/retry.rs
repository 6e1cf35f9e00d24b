//! Backoff arithmetic for the retry loop.
//!
//! The loop itself lives in [`crate::engine`]; this module owns the delay
//! formula and the engine-lifetime rate throttle layered on top of it.

use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;

use crate::config::{RateLimitConfig, RetryConfig};

/// Jitter added to every backoff delay, uniform in `[0, JITTER_MS)`.
const JITTER_MS: u64 = 1000;

/// Upper clamp for the shared throttle factor. The effective delay is capped
/// by config anyway; this only keeps the float from running away.
const MAX_THROTTLE_FACTOR: f64 = 1_000_000.0;

/// Delay scheduled after the `failure_count`-th consecutive failure
/// (1-indexed): `min(base * 2^(n-1) + jitter, max_delay)`.
pub fn backoff_delay(config: &RetryConfig, failure_count: u32) -> Duration {
    let exponent = failure_count.saturating_sub(1).min(63);
    let exponential = config
        .base_delay_ms
        .saturating_mul(1u64.checked_shl(exponent).unwrap_or(u64::MAX));
    let jitter = rand::rng().random_range(0..JITTER_MS);
    Duration::from_millis(exponential.saturating_add(jitter).min(config.max_delay_ms))
}

/// Engine-lifetime retry throttle.
///
/// Every retry anywhere in the engine grows a shared multiplier; while the
/// multiplier is above 1.0, all backoff delays are stretched by it (capped
/// at the configured ceiling). A successful operation resets the multiplier,
/// ending the shed once the service recovers.
#[derive(Debug)]
pub struct RateThrottle {
    factor: Mutex<f64>,
}

impl Default for RateThrottle {
    fn default() -> Self {
        Self::new()
    }
}

impl RateThrottle {
    pub fn new() -> Self {
        Self {
            factor: Mutex::new(1.0),
        }
    }

    /// Stretch a per-call delay by the current shared factor.
    pub fn scale(&self, config: &RateLimitConfig, delay: Duration) -> Duration {
        if !config.enabled {
            return delay;
        }
        let factor = *self.factor.lock().unwrap_or_else(|p| p.into_inner());
        let scaled_ms = (delay.as_millis() as f64 * factor).min(config.max_delay_ms as f64);
        Duration::from_millis(scaled_ms as u64)
    }

    /// Record a retry: the shared factor grows by the configured multiplier.
    pub fn on_retry(&self, config: &RateLimitConfig) {
        if !config.enabled {
            return;
        }
        let mut factor = self.factor.lock().unwrap_or_else(|p| p.into_inner());
        *factor = (*factor * config.backoff_multiplier).min(MAX_THROTTLE_FACTOR);
    }

    /// Record a success: load shedding ends, the factor resets.
    pub fn reset(&self) {
        *self.factor.lock().unwrap_or_else(|p| p.into_inner()) = 1.0;
    }

    #[cfg(test)]
    fn current_factor(&self) -> f64 {
        *self.factor.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base: u64, max: u64) -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: base,
            max_delay_ms: max,
        }
    }

    #[test]
    fn delay_stays_within_jitter_band() {
        let config = policy(1000, 30_000);
        for failure_count in 1..=4u32 {
            let expected_floor = 1000u64 << (failure_count - 1);
            for _ in 0..50 {
                let delay = backoff_delay(&config, failure_count);
                let ms = delay.as_millis() as u64;
                assert!(
                    ms >= expected_floor && ms < expected_floor + JITTER_MS,
                    "attempt {failure_count}: {ms}ms outside [{expected_floor}, {})",
                    expected_floor + JITTER_MS
                );
            }
        }
    }

    #[test]
    fn delay_is_capped_at_max() {
        let config = policy(1000, 2500);
        for _ in 0..50 {
            let delay = backoff_delay(&config, 10);
            assert!(delay.as_millis() as u64 <= 2500);
        }
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let config = policy(1000, 30_000);
        let delay = backoff_delay(&config, u32::MAX);
        assert!(delay.as_millis() as u64 <= 30_000);
    }

    #[test]
    fn throttle_grows_and_caps() {
        let config = RateLimitConfig {
            enabled: true,
            backoff_multiplier: 2.0,
            max_delay_ms: 5000,
        };
        let throttle = RateThrottle::new();
        let base = Duration::from_millis(1000);

        assert_eq!(throttle.scale(&config, base), base);

        throttle.on_retry(&config);
        assert_eq!(throttle.scale(&config, base), Duration::from_millis(2000));

        throttle.on_retry(&config);
        assert_eq!(throttle.scale(&config, base), Duration::from_millis(4000));

        // A further doubling would be 8000ms; the ceiling wins.
        throttle.on_retry(&config);
        assert_eq!(throttle.scale(&config, base), Duration::from_millis(5000));
    }

    #[test]
    fn throttle_resets_on_success() {
        let config = RateLimitConfig {
            enabled: true,
            backoff_multiplier: 3.0,
            max_delay_ms: 60_000,
        };
        let throttle = RateThrottle::new();
        throttle.on_retry(&config);
        throttle.on_retry(&config);
        assert_eq!(throttle.current_factor(), 9.0);

        throttle.reset();
        assert_eq!(throttle.current_factor(), 1.0);
    }

    #[test]
    fn throttle_disabled_is_identity() {
        let config = RateLimitConfig {
            enabled: false,
            backoff_multiplier: 2.0,
            max_delay_ms: 10,
        };
        let throttle = RateThrottle::new();
        throttle.on_retry(&config);
        let delay = Duration::from_millis(1234);
        assert_eq!(throttle.scale(&config, delay), delay);
    }
}
