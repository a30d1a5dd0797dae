use std::time::Duration;

/// Capped exponential backoff: `min(base × 2^(attempt−1), max_delay)`, for at
/// most `max_attempts` consecutive attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_delay,
            max_attempts,
        }
    }

    /// Delay before the 1-based `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// The attempt that follows `current` and its delay, or `None` once the
    /// cap is reached.
    pub fn next_attempt(&self, current: u32) -> Option<(u32, Duration)> {
        if current >= self.max_attempts {
            return None;
        }
        let attempt = current + 1;
        Some((attempt, self.delay(attempt)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 5)
    }

    #[test]
    fn test_delays_double() {
        let b = backoff();
        assert_eq!(b.delay(1), Duration::from_secs(1));
        assert_eq!(b.delay(2), Duration::from_secs(2));
        assert_eq!(b.delay(3), Duration::from_secs(4));
        assert_eq!(b.delay(5), Duration::from_secs(16));
    }

    #[test]
    fn test_delay_is_capped() {
        let b = backoff();
        assert_eq!(b.delay(6), Duration::from_secs(30));
        assert_eq!(b.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_stops_at_cap() {
        let b = backoff();
        assert_eq!(b.next_attempt(0), Some((1, Duration::from_secs(1))));
        assert_eq!(b.next_attempt(4), Some((5, Duration::from_secs(16))));
        assert_eq!(b.next_attempt(5), None);
    }

    #[test]
    fn test_zero_attempts_never_retries() {
        let b = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 0);
        assert_eq!(b.next_attempt(0), None);
    }
}
