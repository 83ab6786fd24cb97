//! Capped exponential backoff shared by the SSE reconnect loop and the
//! session layer's reconnect-on-failure path.

use std::time::Duration;

/// Exponential backoff: `base * 2^attempt`, capped, with ±25% jitter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// First delay
    pub base: Duration,
    /// Ceiling for the computed delay
    pub max_delay: Duration,
    /// Give up after this many attempts; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl BackoffPolicy {
    /// Policy for session-level reconnects: bounded attempts.
    pub fn reconnect(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), or `None` when
    /// attempts are exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts
            && attempt >= max
        {
            return None;
        }
        let base_ms = self.base.as_millis() as u64;
        let exp = base_ms.saturating_mul(1u64 << attempt.min(20));
        let capped = exp.min(self.max_delay.as_millis() as u64);
        // ±25% jitter
        let jitter_range = capped / 4;
        let delay = if jitter_range > 0 {
            capped - jitter_range + fastrand::u64(0..=jitter_range * 2)
        } else {
            capped
        };
        Some(Duration::from_millis(delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let policy = BackoffPolicy::default();
        // Jitter keeps delays within ±25% of the nominal value.
        let nominal = [1_000u64, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000];
        for (attempt, nominal_ms) in nominal.iter().enumerate() {
            let delay = policy.delay(attempt as u32).unwrap().as_millis() as u64;
            assert!(
                delay >= nominal_ms * 3 / 4 && delay <= nominal_ms * 5 / 4,
                "attempt {attempt}: {delay}ms outside jitter band of {nominal_ms}ms"
            );
        }
    }

    #[test]
    fn bounded_policy_exhausts() {
        let policy = BackoffPolicy::reconnect(3);
        assert!(policy.delay(0).is_some());
        assert!(policy.delay(2).is_some());
        assert!(policy.delay(3).is_none());
    }

    #[test]
    fn large_attempt_does_not_overflow() {
        let policy = BackoffPolicy::default();
        let delay = policy.delay(63).unwrap();
        assert!(delay <= Duration::from_millis(37_500));
    }
}
