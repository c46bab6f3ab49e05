//! Delay between lock acquisition attempts.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff applied between attempts inside `acquire_lock`'s retry loop.
///
/// The retry loop never sleeps past the caller's acquire timeout, whatever
/// the policy returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Same delay before every retry.
    Fixed { delay_ms: u64 },

    /// `initial_ms + step_ms * (attempt - 1)`, capped at `max_ms`.
    Linear {
        initial_ms: u64,
        step_ms: u64,
        max_ms: u64,
    },

    /// `base_ms * 2^(attempt - 1)` capped at `max_ms`, then jittered into
    /// the upper half of that window so racing replicas spread out.
    ExponentialJitter { base_ms: u64, max_ms: u64 },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Fixed { delay_ms: 100 }
    }
}

impl RetryPolicy {
    /// Delay to sleep after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let millis = match *self {
            RetryPolicy::Fixed { delay_ms } => delay_ms,
            RetryPolicy::Linear {
                initial_ms,
                step_ms,
                max_ms,
            } => initial_ms
                .saturating_add(step_ms.saturating_mul(u64::from(attempt - 1)))
                .min(max_ms),
            RetryPolicy::ExponentialJitter { base_ms, max_ms } => {
                let capped = exponential_ms(base_ms, attempt).min(max_ms);
                let half = capped / 2;
                half + rand::thread_rng().gen_range(0..=capped - half)
            }
        };
        Duration::from_millis(millis)
    }

    /// Check the policy can make progress.
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            RetryPolicy::Fixed { delay_ms } if delay_ms == 0 => {
                Err("retry delay_ms must be greater than 0".to_string())
            }
            RetryPolicy::Linear {
                initial_ms, max_ms, ..
            } if initial_ms == 0 || max_ms < initial_ms => Err(
                "retry initial_ms must be greater than 0 and no larger than max_ms".to_string(),
            ),
            RetryPolicy::ExponentialJitter { base_ms, max_ms } if base_ms == 0 || max_ms < base_ms => {
                Err("retry base_ms must be greater than 0 and no larger than max_ms".to_string())
            }
            _ => Ok(()),
        }
    }
}

fn exponential_ms(base_ms: u64, attempt: u32) -> u64 {
    let exponent = (attempt - 1).min(32);
    base_ms.saturating_mul(1u64 << exponent)
}
