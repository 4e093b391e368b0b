//! Leaderboard cache configuration.
//!
//! Every field has a default and can be overridden from the environment:
//!
//! | Field                   | Env var                          | Default       |
//! |-------------------------|----------------------------------|---------------|
//! | `key_prefix`            | `TENBO_CACHE_KEY_PREFIX`         | `leaderboard` |
//! | `ttl`                   | `TENBO_CACHE_TTL_SECS`           | 3 hours       |
//! | `retry.max_attempts`    | `TENBO_RETRY_MAX_ATTEMPTS`       | 5             |
//! | `retry.initial_backoff` | `TENBO_RETRY_INITIAL_BACKOFF_MS` | 50 ms         |
//! | `retry.multiplier`      | `TENBO_RETRY_MULTIPLIER`         | 2.0           |
//! | `retry.max_backoff`     | `TENBO_RETRY_MAX_BACKOFF_MS`     | 2 s           |
//! | `tiebreak_salt`         | `TENBO_TIEBREAK_SALT`            | built in      |
//!
//! Unparseable env values fall back to the default; `validate()` catches
//! values that parse but make no sense.

use std::time::Duration;

use crate::{ConfigError, TenboError, TenboResult};

/// Idle lifetime of a league's cached keys.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3 * 60 * 60);

/// Namespace for every leaderboard cache key.
pub const DEFAULT_KEY_PREFIX: &str = "leaderboard";

const DEFAULT_TIEBREAK_SALT: &str = "tenbo-tiebreak-v1";
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 50;
const DEFAULT_MULTIPLIER: f64 = 2.0;
const DEFAULT_MAX_BACKOFF_MS: u64 = 2_000;

/// Bounded exponential backoff for optimistic cache transactions.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            multiplier: DEFAULT_MULTIPLIER,
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based: the wait after the
    /// first failure is `delay_for_attempt(1)`).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        if capped.is_finite() && capped > 0.0 {
            Duration::from_millis(capped as u64)
        } else {
            Duration::ZERO
        }
    }
}

/// Configuration for the leaderboard cache orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardConfig {
    /// Leading component of every cache key.
    pub key_prefix: String,
    /// Refreshed on every successful read and write.
    pub ttl: Duration,
    pub retry: RetryPolicy,
    /// Secret mixed into the ranking tiebreak hash.
    pub tiebreak_salt: String,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            ttl: DEFAULT_CACHE_TTL,
            retry: RetryPolicy::default(),
            tiebreak_salt: DEFAULT_TIEBREAK_SALT.to_string(),
        }
    }
}

impl LeaderboardConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_tiebreak_salt(mut self, salt: impl Into<String>) -> Self {
        self.tiebreak_salt = salt.into();
        self
    }

    /// Load configuration from `TENBO_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |name: &str| lookup(name).and_then(|s| s.trim().parse::<u64>().ok());

        let key_prefix = lookup("TENBO_CACHE_KEY_PREFIX").unwrap_or(defaults.key_prefix);

        let ttl = parsed("TENBO_CACHE_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.ttl);

        let max_attempts = lookup("TENBO_RETRY_MAX_ATTEMPTS")
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(defaults.retry.max_attempts);

        let initial_backoff = parsed("TENBO_RETRY_INITIAL_BACKOFF_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry.initial_backoff);

        let multiplier = lookup("TENBO_RETRY_MULTIPLIER")
            .and_then(|s| s.trim().parse::<f64>().ok())
            .unwrap_or(defaults.retry.multiplier);

        let max_backoff = parsed("TENBO_RETRY_MAX_BACKOFF_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry.max_backoff);

        let tiebreak_salt = lookup("TENBO_TIEBREAK_SALT").unwrap_or(defaults.tiebreak_salt);

        Self {
            key_prefix,
            ttl,
            retry: RetryPolicy {
                max_attempts,
                initial_backoff,
                multiplier,
                max_backoff,
            },
            tiebreak_salt,
        }
    }

    /// Validate the configuration.
    ///
    /// Rejects an empty key prefix or one containing `{` or `}` (keys are
    /// hash-tagged on the league), a zero TTL, zero retry attempts and a
    /// non-positive backoff multiplier.
    pub fn validate(&self) -> TenboResult<()> {
        if self.key_prefix.is_empty() {
            return Err(invalid("key_prefix", &self.key_prefix, "key_prefix must not be empty"));
        }

        if self.key_prefix.contains(['{', '}']) {
            return Err(invalid(
                "key_prefix",
                &self.key_prefix,
                "key_prefix must not contain '{' or '}'",
            ));
        }

        if self.ttl.is_zero() {
            return Err(invalid("ttl", format!("{:?}", self.ttl), "ttl must be positive"));
        }

        if self.retry.max_attempts == 0 {
            return Err(invalid(
                "retry.max_attempts",
                self.retry.max_attempts.to_string(),
                "max_attempts must be at least 1",
            ));
        }

        if !(self.retry.multiplier.is_finite() && self.retry.multiplier > 0.0) {
            return Err(invalid(
                "retry.multiplier",
                self.retry.multiplier.to_string(),
                "multiplier must be a positive number",
            ));
        }

        if self.tiebreak_salt.is_empty() {
            return Err(TenboError::Config(ConfigError::MissingRequired {
                field: "tiebreak_salt".to_string(),
            }));
        }

        Ok(())
    }
}

fn invalid(field: &str, value: impl Into<String>, reason: &str) -> TenboError {
    TenboError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.into(),
        reason: reason.to_string(),
    })
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Backoff never decreases and never exceeds the cap.
        #[test]
        fn prop_backoff_is_monotone_and_capped(
            initial in 0u64..500,
            multiplier in 1.0f64..4.0,
            cap in 0u64..10_000,
            attempt in 1u32..30,
        ) {
            let policy = RetryPolicy {
                max_attempts: 30,
                initial_backoff: Duration::from_millis(initial),
                multiplier,
                max_backoff: Duration::from_millis(cap),
            };
            let this = policy.delay_for_attempt(attempt);
            let next = policy.delay_for_attempt(attempt + 1);
            prop_assert!(this <= next);
            prop_assert!(next <= Duration::from_millis(cap));
        }
    }
}
