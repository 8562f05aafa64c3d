//! Reconnection policy.
//!
//! Decides whether an abnormal disconnect is retried and how long to wait.
//! The default is a fixed interval on every attempt; a `backoff_factor`
//! above 1.0 opts into capped multiplicative backoff.

use std::time::Duration;

/// Retry timing configuration.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first retry, and every retry at the default factor.
    pub interval: Duration,
    /// Multiplier per subsequent attempt. 1.0 keeps the interval fixed.
    pub backoff_factor: f64,
    /// Cap on the computed delay when backing off.
    pub max_interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            backoff_factor: 1.0,
            max_interval: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay for a given attempt number (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // A negative or non-finite factor would produce a delay that
        // Duration cannot represent; treat it as no backoff.
        let factor = if self.backoff_factor.is_finite() && self.backoff_factor >= 0.0 {
            self.backoff_factor
        } else {
            1.0
        };
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.interval.as_secs_f64() * factor.powi(exp);
        let capped = secs.min(self.max_interval.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

/// Outcome of consulting the policy after an abnormal close.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ReconnectDecision {
    /// Reconnection was switched off (destroy, or explicit disable).
    Disabled,
    /// The attempt budget is spent. Terminal for this connection.
    Exhausted,
    /// Schedule one retry after `delay`.
    Retry { delay: Duration },
}

/// Pure decision function over the connection's retry counters.
pub(crate) fn decide(
    enabled: bool,
    attempts: u32,
    max_attempts: Option<u32>,
    policy: &ReconnectPolicy,
) -> ReconnectDecision {
    if !enabled {
        return ReconnectDecision::Disabled;
    }
    if let Some(max) = max_attempts {
        if attempts >= max {
            return ReconnectDecision::Exhausted;
        }
    }
    ReconnectDecision::Retry {
        delay: policy.delay_for_attempt(attempts + 1),
    }
}
