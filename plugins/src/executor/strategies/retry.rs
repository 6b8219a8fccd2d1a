use std::time::Duration;

use weft_core::api::{RetryConfig, RetryStrategyPlugin};

/// Errors no retry can fix: the program could not be started at all.
const DEFAULT_FATAL_PATTERNS: &[&str] = &["failed to spawn", "permission denied"];

pub struct ExponentialBackoffPlugin {
    config: RetryConfig,
    fatal_patterns: Vec<String>,
}

pub struct LinearRetryPlugin {
    config: RetryConfig,
    fatal_patterns: Vec<String>,
}

fn default_fatal_patterns() -> Vec<String> {
    DEFAULT_FATAL_PATTERNS.iter().map(|s| s.to_string()).collect()
}

fn matches_any(patterns: &[String], error: &str) -> bool {
    let error = error.to_lowercase();
    patterns.iter().any(|p| error.contains(&p.to_lowercase()))
}

impl ExponentialBackoffPlugin {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            fatal_patterns: default_fatal_patterns(),
        }
    }

    pub fn with_fatal_patterns(mut self, patterns: Vec<String>) -> Self {
        self.fatal_patterns = patterns;
        self
    }
}

impl LinearRetryPlugin {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            fatal_patterns: default_fatal_patterns(),
        }
    }

    pub fn with_fatal_patterns(mut self, patterns: Vec<String>) -> Self {
        self.fatal_patterns = patterns;
        self
    }
}

impl RetryStrategyPlugin for ExponentialBackoffPlugin {
    fn name(&self) -> &str {
        "exponential-backoff"
    }

    /// Delay after the `attempt`-th failed call: `base * 2^(attempt-1)`, capped.
    fn next_delay(&self, attempt: u32, _error: &str) -> Option<Duration> {
        if attempt >= self.max_attempts() {
            return None;
        }
        let exp = 1u64 << attempt.saturating_sub(1).min(30);
        let delay = self.config.base_delay_ms.saturating_mul(exp);
        let delay = delay.min(self.config.max_delay_ms);
        Some(Duration::from_millis(delay))
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    fn is_fatal_error(&self, error: &str) -> bool {
        matches_any(&self.fatal_patterns, error)
    }
}

impl RetryStrategyPlugin for LinearRetryPlugin {
    fn name(&self) -> &str {
        "linear"
    }

    fn next_delay(&self, attempt: u32, _error: &str) -> Option<Duration> {
        if attempt >= self.max_attempts() {
            return None;
        }
        let multiplier = attempt.max(1) as u64;
        let delay = self.config.base_delay_ms.saturating_mul(multiplier);
        let delay = delay.min(self.config.max_delay_ms);
        Some(Duration::from_millis(delay))
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    fn is_fatal_error(&self, error: &str) -> bool {
        matches_any(&self.fatal_patterns, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let cfg = RetryConfig {
            base_delay_ms: 100,
            max_delay_ms: 1000,
            max_attempts: 6,
            strategy: "exponential-backoff".to_string(),
        };
        let plugin = ExponentialBackoffPlugin::new(cfg);
        assert_eq!(plugin.next_delay(1, "err").unwrap().as_millis(), 100);
        assert_eq!(plugin.next_delay(2, "err").unwrap().as_millis(), 200);
        assert_eq!(plugin.next_delay(5, "err").unwrap().as_millis(), 1000);
        assert_eq!(plugin.next_delay(6, "err"), None);
    }

    #[test]
    fn test_linear_backoff() {
        let cfg = RetryConfig {
            base_delay_ms: 50,
            max_delay_ms: 200,
            max_attempts: 4,
            strategy: "linear".to_string(),
        };
        let plugin = LinearRetryPlugin::new(cfg);
        assert_eq!(plugin.next_delay(1, "err").unwrap().as_millis(), 50);
        assert_eq!(plugin.next_delay(3, "err").unwrap().as_millis(), 150);
        assert_eq!(plugin.next_delay(4, "err"), None);
    }

    #[test]
    fn zero_attempts_still_means_one_call() {
        let plugin = LinearRetryPlugin::new(RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        });
        assert_eq!(plugin.max_attempts(), 1);
        assert!(!plugin.should_retry(1, "boom"));
    }

    #[test]
    fn spawn_failures_are_fatal() {
        let plugin = ExponentialBackoffPlugin::new(RetryConfig {
            max_attempts: 3,
            ..RetryConfig::default()
        });
        assert!(plugin.is_fatal_error("task failed: failed to spawn 'nope': No such file"));
        assert!(!plugin.is_fatal_error("task failed: exit status 1"));
        assert!(plugin.should_retry(1, "exit status 1"));

        let custom = plugin.with_fatal_patterns(vec!["quota".to_string()]);
        assert!(custom.is_fatal_error("Quota exceeded"));
        assert!(!custom.is_fatal_error("failed to spawn"));
    }
}
