//! Bounded exponential backoff for WebSocket reconnection.

use std::time::Duration;

/// Exponential backoff configuration for reconnection attempts.
///
/// Reconnection retries forever while the client is running; only the
/// delay between attempts is bounded.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on the backoff delay. Default: 60s.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Doubling limit; past this the delay is pinned at `max_delay` anyway.
const MAX_DOUBLINGS: u32 = 16;

/// Delay before reconnection attempt number `attempt` (0-based).
///
/// The initial delay doubles per attempt up to `max_delay`, then gets
/// scaled by a per-attempt factor in [0.85, 1.15] so that a fleet of
/// clients dropped by the same hub restart does not reconnect in
/// lockstep. The factor comes from a multiplicative hash of the attempt
/// counter, keeping the schedule reproducible in tests.
pub fn backoff_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    let doubled = config
        .initial_delay
        .checked_mul(1 << attempt.min(MAX_DOUBLINGS))
        .unwrap_or(config.max_delay)
        .min(config.max_delay);

    let hash = attempt.wrapping_mul(0x9E37_79B9) >> 24; // 0..=255
    let spread = 0.85 + 0.30 * (f64::from(hash) / 255.0);
    doubled.mul_f64(spread)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn backoff_increases_while_uncapped() {
        let config = ReconnectConfig::default();

        let d0 = backoff_delay(0, &config);
        let d1 = backoff_delay(1, &config);
        let d2 = backoff_delay(2, &config);

        // Doubling dominates the +-15% spread.
        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_stays_near_max_delay_once_capped() {
        let config = ReconnectConfig::default();

        for attempt in [6, 10, 20, 100] {
            let delay = backoff_delay(attempt, &config);
            assert!(
                delay >= config.max_delay.mul_f64(0.85),
                "attempt {attempt}: {delay:?} below spread floor"
            );
            assert!(
                delay <= config.max_delay.mul_f64(1.15),
                "attempt {attempt}: {delay:?} above spread ceiling"
            );
        }
    }

    #[test]
    fn backoff_is_deterministic_per_attempt() {
        let config = ReconnectConfig::default();
        assert_eq!(backoff_delay(3, &config), backoff_delay(3, &config));
    }

    #[test]
    fn backoff_survives_huge_attempt_counts() {
        let config = ReconnectConfig::default();
        let delay = backoff_delay(u32::MAX, &config);
        assert!(delay <= config.max_delay.mul_f64(1.15));
    }
}
