// Jittered exponential backoff retry policy (spec.md section 4.5: "retry
// with jittered exponential backoff, maxAttempts=3 by default for transient
// errors"). Adapted from the teacher's `durable::reliability::retry`
// module, restyled around `CortexError::is_retryable` instead of a
// string-typed error-type table.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn duration_as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

fn duration_from_millis<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let ms = u64::deserialize(d)?;
    Ok(Duration::from_millis(ms))
}

/// Retry policy for a single Runtime action step. The Runtime default
/// (`RetryPolicy::default()`) is `maxAttempts=3` as specified for tool
/// actions; callers may override per action kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(serialize_with = "duration_as_millis", deserialize_with = "duration_from_millis")]
    pub initial_interval: Duration,
    #[serde(serialize_with = "duration_as_millis", deserialize_with = "duration_from_millis")]
    pub max_interval: Duration,
    pub backoff_coefficient: f64,
    /// Fraction of the computed delay to randomize, in `[0.0, 1.0]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            backoff_coefficient: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// No retries: the first failure is terminal.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Constant-interval retries (no exponential growth).
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn with_initial_interval(mut self, d: Duration) -> Self {
        self.initial_interval = d;
        self
    }

    pub fn with_max_interval(mut self, d: Duration) -> Self {
        self.max_interval = d;
        self
    }

    pub fn with_backoff_coefficient(mut self, c: f64) -> Self {
        self.backoff_coefficient = c;
        self
    }

    pub fn with_jitter(mut self, j: f64) -> Self {
        self.jitter = j.clamp(0.0, 1.0);
        self
    }

    /// Delay to sleep before the given attempt number (1-indexed: the delay
    /// before the *second* attempt, i.e. the first retry, is `delay_for_attempt(2)`).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let retry_num = (attempt - 1) as i32;
        let base = self.initial_interval.as_millis() as f64
            * self.backoff_coefficient.powi(retry_num - 1);
        let capped = base.min(self.max_interval.as_millis() as f64);

        let jittered = if self.jitter > 0.0 {
            let jitter_range = capped * self.jitter;
            let delta = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
            (capped + delta).max(0.0)
        } else {
            capped
        };

        Duration::from_millis(jittered as u64)
    }

    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allows_three_attempts() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 3);
        assert!(p.has_attempts_remaining(1));
        assert!(p.has_attempts_remaining(2));
        assert!(!p.has_attempts_remaining(3));
    }

    #[test]
    fn no_retry_allows_exactly_one_attempt() {
        let p = RetryPolicy::no_retry();
        assert!(!p.has_attempts_remaining(1));
    }

    #[test]
    fn delay_grows_exponentially_before_jitter_caps_it() {
        let p = RetryPolicy::default().with_jitter(0.0);
        assert_eq!(p.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(1000));
        assert_eq!(p.delay_for_attempt(4), Duration::from_millis(2000));
    }

    #[test]
    fn delay_never_exceeds_max_interval() {
        let p = RetryPolicy::default()
            .with_jitter(0.0)
            .with_max_interval(Duration::from_millis(600));
        assert_eq!(p.delay_for_attempt(5), Duration::from_millis(600));
    }

    #[test]
    fn fixed_policy_does_not_grow() {
        let p = RetryPolicy::fixed(Duration::from_secs(1), 5);
        assert_eq!(p.delay_for_attempt(2), Duration::from_secs(1));
        assert_eq!(p.delay_for_attempt(4), Duration::from_secs(1));
    }

    #[test]
    fn jitter_is_clamped_to_unit_interval() {
        let p = RetryPolicy::default().with_jitter(5.0);
        assert_eq!(p.jitter, 1.0);
    }

    #[test]
    fn serde_round_trips() {
        let p = RetryPolicy::default();
        let json = serde_json::to_string(&p).unwrap();
        let back: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }
}
