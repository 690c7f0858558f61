//! Retry budgets. Routine updates and migration writes are budgeted independently.

use std::num::NonZeroUsize;
use std::time::Duration;

use prodcat_catalog::RetryPolicy;

/// CLI config for retrying catalog updates that conflict with other writers.
#[derive(Debug, Clone, Copy, clap::Parser)]
pub struct UpdateRetryConfig {
    /// Maximum number of read-modify-write cycles for one update before giving up.
    #[clap(
        long = "max-attempts",
        env = "MAX_ATTEMPTS",
        default_value_t = RetryPolicy::DEFAULT_UPDATE_ATTEMPTS,
        action
    )]
    pub max_attempts: NonZeroUsize,

    /// Upper bound of the random pause between two attempts.
    #[clap(
        long = "retry-backoff",
        env = "RETRY_BACKOFF",
        default_value = "2s",
        value_parser = humantime::parse_duration,
    )]
    pub retry_backoff: Duration,
}

impl UpdateRetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.retry_backoff)
    }
}

/// CLI config for retrying migration writes.
#[derive(Debug, Clone, Copy, clap::Parser)]
pub struct MigrationRetryConfig {
    /// Maximum number of attempts for each record written during migration.
    #[clap(
        id = "migration_max_attempts",
        long = "migration-max-attempts",
        env = "MIGRATION_MAX_ATTEMPTS",
        default_value_t = RetryPolicy::DEFAULT_MIGRATION_ATTEMPTS,
        action
    )]
    pub max_attempts: NonZeroUsize,

    /// Upper bound of the random pause between two attempts.
    #[clap(
        id = "migration_retry_backoff",
        long = "migration-retry-backoff",
        env = "MIGRATION_RETRY_BACKOFF",
        default_value = "1s",
        value_parser = humantime::parse_duration,
    )]
    pub retry_backoff: Duration,
}

impl MigrationRetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.retry_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn explicit_budgets() {
        let config = UpdateRetryConfig::try_parse_from([
            "prodcat",
            "--max-attempts",
            "7",
            "--retry-backoff",
            "250ms",
        ])
        .unwrap();
        assert_eq!(
            config.policy(),
            RetryPolicy::new(NonZeroUsize::new(7).unwrap(), Duration::from_millis(250))
        );

        let config = MigrationRetryConfig::try_parse_from([
            "prodcat",
            "--migration-max-attempts",
            "3",
            "--migration-retry-backoff",
            "0s",
        ])
        .unwrap();
        assert_eq!(config.policy().max_attempts.get(), 3);
        assert!(config.policy().backoff.is_zero());
    }

    #[test]
    fn zero_attempts_rejected() {
        assert!(UpdateRetryConfig::try_parse_from(["prodcat", "--max-attempts", "0"]).is_err());
        assert!(UpdateRetryConfig::try_parse_from(["prodcat", "--retry-backoff", "soon"]).is_err());
    }
}
