use std::time::Duration;

use crate::config::{ReconnectStrategy, RelayConfig};

/// Decides how long to wait before reconnect attempt `attempt` (1-based).
/// Returning `None` stops reconnecting.
pub trait ReconnectPolicy: Send + Sync {
    fn delay_for(&self, attempt: u32) -> Option<Duration>;
}

/// Same delay every time, forever.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl ReconnectPolicy for FixedDelay {
    fn delay_for(&self, _attempt: u32) -> Option<Duration> {
        Some(self.delay)
    }
}

/// Doubling delay from `base`, capped at `max_delay`, with an optional
/// attempt limit.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    base: Duration,
    max_delay: Duration,
    max_attempts: Option<u32>,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max_delay: Duration) -> Self {
        Self {
            base,
            max_delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| attempt > max) {
            return None;
        }
        let shift = attempt.saturating_sub(1).min(20);
        let delay = self.base.saturating_mul(1_u32 << shift);
        Some(delay.min(self.max_delay))
    }
}

/// Build the policy selected in `[relay]`.
pub fn policy_from_config(config: &RelayConfig) -> Box<dyn ReconnectPolicy> {
    match config.reconnect_strategy {
        ReconnectStrategy::Fixed => Box::new(FixedDelay::new(config.reconnect_delay())),
        ReconnectStrategy::Exponential => {
            let backoff =
                ExponentialBackoff::new(config.reconnect_delay(), config.reconnect_max_delay());
            match config.reconnect_max_attempts {
                Some(max) => Box::new(backoff.with_max_attempts(max)),
                None => Box::new(backoff),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_never_gives_up() {
        let policy = FixedDelay::default();
        assert_eq!(policy.delay_for(1), Some(Duration::from_secs(10)));
        assert_eq!(policy.delay_for(10_000), Some(Duration::from_secs(10)));
    }

    #[test]
    fn exponential_starts_with_base_delay() {
        let policy = ExponentialBackoff::new(Duration::from_millis(250), Duration::from_secs(8));
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(250)));
    }

    #[test]
    fn exponential_doubles_per_attempt() {
        let policy = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(10));
        assert_eq!(policy.delay_for(4), Some(Duration::from_millis(800)));
    }

    #[test]
    fn exponential_caps_delay_at_max() {
        let policy = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(6), Some(Duration::from_secs(4)));
        assert_eq!(policy.delay_for(u32::MAX), Some(Duration::from_secs(4)));
    }

    #[test]
    fn exponential_stops_after_max_attempts() {
        let policy = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(4))
            .with_max_attempts(3);
        assert!(policy.delay_for(3).is_some());
        assert_eq!(policy.delay_for(4), None);
    }

    #[test]
    fn config_selects_policy() {
        let mut config = RelayConfig::default();
        assert_eq!(
            policy_from_config(&config).delay_for(7),
            Some(Duration::from_secs(10))
        );

        config.reconnect_strategy = ReconnectStrategy::Exponential;
        config.reconnect_max_attempts = Some(2);
        let policy = policy_from_config(&config);
        assert_eq!(policy.delay_for(2), Some(Duration::from_secs(20)));
        assert_eq!(policy.delay_for(3), None);
    }
}
