//! Exponential reconnect backoff with jitter

use std::time::Duration;

/// Reconnect schedule
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of each delay that is randomized, 0.0..=1.0
    pub jitter: f64,
    /// Give up after this many attempts; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: Some(10),
        }
    }
}

/// Iterator-like delay generator
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.config.max_attempts {
            if self.attempt >= max {
                return None;
            }
        }

        let base = self.config.initial_delay.as_secs_f64()
            * self.config.multiplier.powi(self.attempt.min(32) as i32);
        let capped = base.min(self.config.max_delay.as_secs_f64());

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        // Spread uniformly over [capped * (1 - jitter), capped]
        let factor = 1.0 - jitter * rand::random::<f64>();

        self.attempt += 1;
        Some(Duration::from_secs_f64(capped * factor))
    }

    /// Attempts handed out so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
