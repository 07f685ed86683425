use std::time::Duration;

/// How often a failed sync pass is retried and how long to back off in between
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(15 * 60),
            multiplier: 2.0,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retrying after `failed_attempts` failures
    pub fn delay_for_attempt(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(failed_attempts - 1).unwrap_or(i32::MAX);
        let delay = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(delay.min(self.max_delay.as_millis() as f64) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5)
    }
}
