// src/engine/retry.rs

//! Exponential backoff bounded by a per-task retry budget.

use std::time::Duration;

use crate::plan::SchedulerSection;

/// Backoff policy shared by every task in a run.
///
/// The delay before retry number `n` (1-based) is `unit * base^n`, optionally
/// capped at `max_backoff`. With the defaults (base 2, unit 1s) the first
/// retry waits 2s, the second 4s, and so on. Delays are minimums.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: u32,
    pub unit: Duration,
    pub max_backoff: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: 2,
            unit: Duration::from_secs(1),
            max_backoff: None,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Consume one retry and relaunch after `delay`.
    Retry { retry_attempts: u32, delay: Duration },
    /// Budget exhausted; the task fails permanently.
    GiveUp,
}

impl RetryPolicy {
    pub fn from_section(section: &SchedulerSection) -> Self {
        Self {
            base: section.retry_base,
            unit: Duration::from_millis(section.retry_unit_ms),
            max_backoff: section.max_backoff_ms.map(Duration::from_millis),
        }
    }

    /// Delay before the retry that brings the count to `retry_attempts`.
    pub fn backoff(&self, retry_attempts: u32) -> Duration {
        let factor = self.base.checked_pow(retry_attempts).unwrap_or(u32::MAX);
        let delay = self.unit.checked_mul(factor).unwrap_or(Duration::MAX);
        match self.max_backoff {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Decide after a failure, given the retries already consumed.
    ///
    /// `retry_budget = 0` never retries; otherwise at most `retry_budget`
    /// retries follow the first attempt.
    pub fn decide(&self, retry_attempts: u32, retry_budget: u32) -> RetryDecision {
        if retry_attempts < retry_budget {
            let next = retry_attempts + 1;
            RetryDecision::Retry {
                retry_attempts: next,
                delay: self.backoff(next),
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}
