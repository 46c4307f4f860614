//! Retry and backoff configuration with jitter support.
//!
//! Used by the batching bridge's HTTP delivery path. Retries are safe here
//! because a flushed batch carries `(orgId, eventId)` and the reconciler
//! treats HTTP 409 as an idempotent duplicate (§4.2, §7).

use rand::Rng;
use std::time::Duration;

/// Retry/backoff configuration: `delay(attempt) = min(base * 2^attempt, max) ± 20%`.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub max_retries: u32,
    /// Jitter mode for backoff delays (prevents thundering herd)
    pub jitter: JitterMode,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(15),
            multiplier: 2.0,
            max_retries: 8,
            jitter: JitterMode::Equal,
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set initial backoff delay
    pub fn with_initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    /// Set maximum backoff delay
    pub fn with_max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff = delay;
        self
    }

    /// Set backoff multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set maximum retry attempts
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set jitter mode
    pub fn with_jitter(mut self, jitter: JitterMode) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the backoff delay for a given attempt, with jitter applied.
    ///
    /// `base_delay(attempt) = min(initial_backoff * multiplier^attempt, max_backoff)`.
    pub fn next_backoff(&self, attempt: u32) -> Duration {
        let multiplied = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let base_delay = Duration::from_secs_f64(multiplied.min(self.max_backoff.as_secs_f64()));

        apply_jitter(base_delay, &self.jitter)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Jitter mode for retry backoff (following AWS SDK patterns).
#[derive(Clone, Debug, Default)]
pub enum JitterMode {
    /// No jitter - use exact backoff delay
    None,
    /// Full jitter: random delay between 0 and calculated backoff
    Full,
    /// Equal jitter: half fixed + half random
    #[default]
    Equal,
    /// Decorrelated jitter (AWS recommended)
    Decorrelated,
    /// `delay ± 20%`, the bridge's retry formula (§4.2).
    PlusMinus20,
}

/// Apply jitter to a backoff delay.
pub fn apply_jitter(delay: Duration, mode: &JitterMode) -> Duration {
    let mut rng = rand::thread_rng();

    match mode {
        JitterMode::None => delay,
        JitterMode::Full => {
            // Random between 0 and delay
            Duration::from_secs_f64(rng.gen::<f64>() * delay.as_secs_f64())
        }
        JitterMode::Equal => {
            // Half fixed + half random
            let half = delay.as_secs_f64() / 2.0;
            Duration::from_secs_f64(half + rng.gen::<f64>() * half)
        }
        JitterMode::Decorrelated => {
            // AWS-style: min(max_delay, random_between(base, delay * 3))
            let base = delay.as_secs_f64() / 3.0;
            let upper = delay.as_secs_f64() * 3.0;
            Duration::from_secs_f64(base + rng.gen::<f64>() * (upper - base))
        }
        JitterMode::PlusMinus20 => {
            let factor = 0.8 + rng.gen::<f64>() * 0.4; // [0.8, 1.2)
            Duration::from_secs_f64(delay.as_secs_f64() * factor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let cfg = RetryConfig::new().with_jitter(JitterMode::None);
        assert_eq!(cfg.next_backoff(0), cfg.initial_backoff);
        assert_eq!(
            cfg.next_backoff(1),
            Duration::from_secs_f64(cfg.initial_backoff.as_secs_f64() * cfg.multiplier)
        );
        assert_eq!(cfg.next_backoff(20), cfg.max_backoff);
    }

    #[test]
    fn plus_minus_20_stays_in_band() {
        let base = Duration::from_millis(1000);
        for _ in 0..200 {
            let jittered = apply_jitter(base, &JitterMode::PlusMinus20);
            assert!(jittered.as_millis() >= 800 && jittered.as_millis() <= 1200);
        }
    }

    #[test]
    fn should_retry_respects_max() {
        let cfg = RetryConfig::new().with_max_retries(3);
        assert!(cfg.should_retry(0));
        assert!(cfg.should_retry(2));
        assert!(!cfg.should_retry(3));
    }
}
