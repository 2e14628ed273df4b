use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::classify::is_retryable;
use crate::config::RetryConfig;
use crate::engine::ErrorKind;
use crate::registry::Job;

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Always `retry_delay`.
    #[default]
    Fixed,
    /// `retry_delay * 2^(retry-1)`, capped.
    Exponential,
    /// Exponential, then drawn uniformly from `[delay/2, delay]`.
    Jittered,
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this failure.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Per-job retry policy, built from the job descriptor and the global retry section.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound on exponential/jittered delays.
    pub max_delay: Duration,
    pub backoff: BackoffKind,
    /// Give up immediately on structural failures.
    pub fast_fail_structural: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: cfg.retry_delay(),
            max_delay: cfg.max_delay(),
            backoff: BackoffKind::Fixed,
            fast_fail_structural: cfg.fast_fail_structural,
        }
    }

    /// Policy for `job`: its own retry count, delay and backoff; global cap and fast-fail.
    pub fn for_job(job: &Job, cfg: &RetryConfig) -> Self {
        Self {
            max_retries: job.max_retries,
            base_delay: job.retry_delay,
            max_delay: cfg.max_delay().max(job.retry_delay),
            backoff: job.backoff,
            fast_fail_structural: cfg.fast_fail_structural,
        }
    }

    /// Decide what to do after a failed attempt.
    ///
    /// `retries_used` counts retries already made (0 after the first attempt).
    pub fn decide(&self, retries_used: u32, kind: ErrorKind) -> RetryDecision {
        if retries_used >= self.max_retries {
            return RetryDecision::NoRetry;
        }
        if !is_retryable(kind, self.fast_fail_structural) {
            return RetryDecision::NoRetry;
        }
        RetryDecision::RetryAfter(self.delay_for(retries_used + 1))
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            BackoffKind::Fixed => self.base_delay,
            BackoffKind::Exponential => self.exponential(retry),
            BackoffKind::Jittered => {
                let full = self.exponential(retry);
                if full.is_zero() {
                    return full;
                }
                let half = full / 2;
                rand::rng().random_range(half..=full)
            }
        }
    }

    fn exponential(&self, retry: u32) -> Duration {
        let exp = 1u32 << retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(exp).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(backoff: BackoffKind) -> RetryPolicy {
        RetryPolicy {
            max_retries: 20,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            backoff,
            fast_fail_structural: false,
        }
    }

    fn delay(d: RetryDecision) -> Duration {
        match d {
            RetryDecision::RetryAfter(d) => d,
            RetryDecision::NoRetry => panic!("expected retry"),
        }
    }

    #[test]
    fn fixed_delay_is_constant() {
        let p = policy(BackoffKind::Fixed);
        assert_eq!(delay(p.decide(0, ErrorKind::Capability)), Duration::from_millis(250));
        assert_eq!(delay(p.decide(5, ErrorKind::Capability)), Duration::from_millis(250));
    }

    #[test]
    fn exponential_backoff_grows_and_is_capped() {
        let p = policy(BackoffKind::Exponential);
        assert_eq!(delay(p.decide(0, ErrorKind::Timeout)), Duration::from_millis(250));
        assert_eq!(delay(p.decide(1, ErrorKind::Timeout)), Duration::from_millis(500));
        assert_eq!(delay(p.decide(2, ErrorKind::Timeout)), Duration::from_secs(1));
        assert_eq!(delay(p.decide(15, ErrorKind::Timeout)), p.max_delay);
    }

    #[test]
    fn jitter_stays_within_half_to_full() {
        let p = policy(BackoffKind::Jittered);
        for _ in 0..50 {
            let d = p.delay_for(3);
            assert!(d >= Duration::from_millis(500), "{d:?}");
            assert!(d <= Duration::from_secs(1), "{d:?}");
        }
    }

    #[test]
    fn respects_max_retries() {
        let mut p = policy(BackoffKind::Fixed);
        p.max_retries = 2;
        assert!(matches!(p.decide(0, ErrorKind::Capability), RetryDecision::RetryAfter(_)));
        assert!(matches!(p.decide(1, ErrorKind::Capability), RetryDecision::RetryAfter(_)));
        assert_eq!(p.decide(2, ErrorKind::Capability), RetryDecision::NoRetry);
    }

    #[test]
    fn zero_retries_never_retries() {
        let mut p = policy(BackoffKind::Fixed);
        p.max_retries = 0;
        assert_eq!(p.decide(0, ErrorKind::Timeout), RetryDecision::NoRetry);
    }

    #[test]
    fn cancelled_is_never_retried() {
        let p = policy(BackoffKind::Fixed);
        assert_eq!(p.decide(0, ErrorKind::Cancelled), RetryDecision::NoRetry);
    }

    #[test]
    fn structural_fast_fail_is_opt_in() {
        let mut p = policy(BackoffKind::Fixed);
        assert!(matches!(p.decide(0, ErrorKind::Structural), RetryDecision::RetryAfter(_)));
        p.fast_fail_structural = true;
        assert_eq!(p.decide(0, ErrorKind::Structural), RetryDecision::NoRetry);
    }

    #[test]
    fn job_policy_uses_job_fields() {
        let mut job = Job::new("j", "cap");
        job.max_retries = 7;
        job.retry_delay = Duration::from_secs(2);
        job.backoff = BackoffKind::Exponential;
        let cfg = RetryConfig {
            max_delay_secs: 10,
            fast_fail_structural: true,
            ..RetryConfig::default()
        };
        let p = RetryPolicy::for_job(&job, &cfg);
        assert_eq!(p.max_retries, 7);
        assert_eq!(p.base_delay, Duration::from_secs(2));
        assert_eq!(p.max_delay, Duration::from_secs(10));
        assert!(p.fast_fail_structural);
    }
}
