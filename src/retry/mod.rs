//! Retry/backoff policy
//!
//! Decides whether a failed attempt or assistance step is retried and how
//! long to wait. Delay is exponential in the attempt number with a hard cap.

use serde::{Deserialize, Serialize};

use crate::barrier::Barrier;

/// Default upper bound on a single backoff delay
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

/// Outcome of a retry decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryDecision {
    /// Whether to retry at all
    pub retry: bool,

    /// How long to wait before the retry, in ms (0 when retry is false)
    #[serde(rename = "delay-ms")]
    pub delay_ms: u64,
}

impl RetryDecision {
    fn no_retry() -> Self {
        Self { retry: false, delay_ms: 0 }
    }
}

/// Failure classes the policy distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network timeout, probe failure, 5xx - retry on its own
    Transient,
    /// A classified barrier
    Barrier(Barrier),
    /// An assistance step whose request-level flag allows auto-resume
    AutoResumable,
}

/// Exponential backoff policy with a configurable cap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Upper bound on any single delay
    #[serde(rename = "max-delay-ms", default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with a specific cap
    pub fn with_cap(max_delay_ms: u64) -> Self {
        Self { max_delay_ms }
    }

    /// Decide whether attempt `attempt_number` (1-indexed) should retry.
    ///
    /// No retry at or past `max_attempts`. Only auto-resumable failure
    /// classes retry without a human: transient faults, queue waits, and
    /// steps explicitly flagged auto-resumable. Barriers that need a human
    /// never retry here - they route to the assistance workflow instead.
    /// A CAPTCHA never auto-retries regardless of any flag.
    pub fn decide(
        &self,
        attempt_number: u32,
        failure: FailureClass,
        max_attempts: u32,
        base_delay_ms: u64,
    ) -> RetryDecision {
        if attempt_number >= max_attempts {
            return RetryDecision::no_retry();
        }

        let resumable = match failure {
            FailureClass::Transient => true,
            FailureClass::AutoResumable => true,
            FailureClass::Barrier(Barrier::Captcha) => false,
            FailureClass::Barrier(barrier) => !barrier.needs_human() && barrier.is_blocking(),
        };

        if !resumable {
            return RetryDecision::no_retry();
        }

        RetryDecision {
            retry: true,
            delay_ms: self.delay_for(attempt_number, base_delay_ms),
        }
    }

    /// Backoff delay for attempt n (1-indexed): `base * 2^(n-1)`, capped
    pub fn delay_for(&self, attempt_number: u32, base_delay_ms: u64) -> u64 {
        let exponent = attempt_number.saturating_sub(1).min(63);
        base_delay_ms
            .saturating_mul(1u64.checked_shl(exponent).unwrap_or(u64::MAX))
            .min(self.max_delay_ms)
    }
}
