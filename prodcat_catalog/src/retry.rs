//! Bounded retry budget for conflicting writes.

use std::num::NonZeroUsize;
use std::time::Duration;

use rand::Rng;

/// How often a conflicting read-modify-write cycle is attempted, and how long to pause between
/// attempts. The pause is a random duration up to `backoff`, so that writers colliding on the same
/// record do not collide again in lock step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: NonZeroUsize,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Default attempt budget for routine catalog updates.
    pub const DEFAULT_UPDATE_ATTEMPTS: NonZeroUsize = NonZeroUsize::new(100).unwrap();

    /// Default attempt budget for migration writes.
    pub const DEFAULT_MIGRATION_ATTEMPTS: NonZeroUsize = NonZeroUsize::new(10).unwrap();

    pub fn new(max_attempts: NonZeroUsize, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Retry without pausing between attempts.
    pub fn immediate(max_attempts: NonZeroUsize) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    pub fn attempts_remaining(&self, attempt: usize) -> bool {
        attempt < self.max_attempts.get()
    }

    /// Sleep before the next attempt.
    pub async fn pause(&self) {
        let delay = self.jitter();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn jitter(&self) -> Duration {
        if self.backoff.is_zero() {
            return Duration::ZERO;
        }
        rand::thread_rng().gen_range(Duration::ZERO..=self.backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_UPDATE_ATTEMPTS, Duration::from_secs(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_backoff() {
        let policy = RetryPolicy::new(NonZeroUsize::new(3).unwrap(), Duration::from_millis(50));
        for _ in 0..100 {
            assert!(policy.jitter() <= Duration::from_millis(50));
        }
        assert_eq!(
            RetryPolicy::immediate(NonZeroUsize::new(3).unwrap()).jitter(),
            Duration::ZERO
        );
    }

    #[test]
    fn attempt_budget() {
        let policy = RetryPolicy::immediate(NonZeroUsize::new(2).unwrap());
        assert!(policy.attempts_remaining(1));
        assert!(!policy.attempts_remaining(2));
    }
}
