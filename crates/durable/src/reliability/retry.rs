//! Task-level retry delay.
//!
//! Narrowed from the teacher's multi-field `RetryPolicy` (attempts/initial
//! interval/max interval/backoff coefficient) down to the flat
//! `{limit, delaySecond}` shape carried on
//! [`RetryConfig`](crate::model::RetryConfig) (§3): a fixed delay per retry,
//! not exponential backoff, with the same jitter technique so many
//! concurrent retries don't all wake up in the same instant.

use std::time::Duration;

use rand::Rng;

use crate::model::RetryConfig;

/// Jitter applied on top of `delaySecond`: ±10%, matching the teacher's
/// default exponential policy's jitter factor.
const JITTER_FACTOR: f64 = 0.1;

/// Whether a task currently at `current_retries` attempts may retry again
/// under `retry`.
pub fn retries_remaining(retry: &RetryConfig, current_retries: u32) -> bool {
    current_retries < retry.limit
}

/// Delay before the next retry: `retry.delay_second` ± jitter.
pub fn next_retry_delay(retry: &RetryConfig) -> Duration {
    if retry.delay_second == 0 {
        return Duration::ZERO;
    }
    let base = retry.delay_second as f64;
    let jitter_range = base * JITTER_FACTOR;
    let offset = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
    Duration::from_secs_f64((base + offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_delay_has_no_jitter() {
        let retry = RetryConfig { limit: 3, delay_second: 0 };
        assert_eq!(next_retry_delay(&retry), Duration::ZERO);
    }

    #[test]
    fn delay_stays_within_the_jitter_band() {
        let retry = RetryConfig {
            limit: 3,
            delay_second: 10,
        };
        for _ in 0..50 {
            let delay = next_retry_delay(&retry).as_secs_f64();
            assert!((9.0..=11.0).contains(&delay), "delay {delay} out of band");
        }
    }

    #[test]
    fn remaining_attempts_respects_the_limit() {
        let retry = RetryConfig { limit: 2, delay_second: 0 };
        assert!(retries_remaining(&retry, 0));
        assert!(retries_remaining(&retry, 1));
        assert!(!retries_remaining(&retry, 2));
    }
}
