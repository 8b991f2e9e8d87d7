use crate::config::RetryConfig;
use crate::errors::DeviceError;
use std::time::Duration;

/// Bounded exponential backoff for transient transport errors.
///
/// Only [`DeviceError::is_transient`] failures are retried. Anything else is
/// returned on the spot: a rejected record command must not be re-sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.initial_backoff_ms),
            backoff_max: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based):
    /// `min(backoff_base * 2^(attempt-1), backoff_max)`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.backoff_base.saturating_mul(multiplier);
        std::cmp::min(delay, self.backoff_max)
    }

    /// Run `op`, retrying transient failures until the attempt budget is spent.
    pub fn run<T>(
        &self,
        operation: &str,
        mut op: impl FnMut() -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff_for_attempt(attempt);
                    log::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        operation,
                        attempt,
                        self.max_attempts,
                        e,
                        delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(300),
        };
        assert_eq!(policy.backoff_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_millis(300));
        assert_eq!(policy.backoff_for_attempt(30), Duration::from_millis(300));
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let mut calls = 0;
        let result = fast_policy(3).run("status check", || {
            calls += 1;
            if calls < 3 {
                Err(DeviceError::Transient("usb stall".into()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(3));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_retries_are_bounded() {
        let mut calls = 0;
        let result: Result<(), _> = fast_policy(4).run("status check", || {
            calls += 1;
            Err(DeviceError::Transient("usb stall".into()))
        });
        assert!(matches!(result, Err(DeviceError::Transient(_))));
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_rejections_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = fast_policy(5).run("begin recording", || {
            calls += 1;
            Err(DeviceError::Busy)
        });
        assert_eq!(result, Err(DeviceError::Busy));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_from_config() {
        let policy = RetryPolicy::from(&RetryConfig {
            max_attempts: 0,
            initial_backoff_ms: 10,
            max_backoff_ms: 80,
        });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.backoff_max, Duration::from_millis(80));
    }
}
