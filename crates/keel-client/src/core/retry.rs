use std::time::Duration;

use rand::Rng;

use crate::data::RetryPolicy;

/// Statuses worth another attempt: request timeout, rate limiting and
/// transient server failures.
pub const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

/// Calculate the delay before a retry attempt using exponential backoff.
///
/// The delay formula is: `base * 2^retry_count`
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use keel_client::core::retry_delay;
///
/// // First retry: base * 2^0 = base
/// assert_eq!(retry_delay(0, Duration::from_millis(100)), Duration::from_millis(100));
///
/// // Second retry: base * 2^1 = base * 2
/// assert_eq!(retry_delay(1, Duration::from_millis(100)), Duration::from_millis(200));
///
/// // Third retry: base * 2^2 = base * 4
/// assert_eq!(retry_delay(2, Duration::from_millis(100)), Duration::from_millis(400));
/// ```
pub fn retry_delay(retry_count: u32, base: Duration) -> Duration {
    let multiplier = 2_u32.saturating_pow(retry_count);
    base.saturating_mul(multiplier)
}

/// Delay before retry `retry_count` (0-indexed), without jitter.
///
/// Exponential: `min(base * 2^retry_count, max_delay)`.
/// Constant: `min(base, max_delay)`.
pub fn backoff_delay(retry_count: u32, policy: &RetryPolicy) -> Duration {
    let delay = if policy.exponential {
        retry_delay(retry_count, policy.base_delay)
    } else {
        policy.base_delay
    };
    delay.min(policy.max_delay)
}

/// Add up to 10% random jitter to an exponential delay, staying within
/// `max_delay`.
pub fn with_jitter(delay: Duration, max_delay: Duration) -> Duration {
    let spread = delay.as_secs_f64() * 0.1;
    let jitter = if spread > 0.0 {
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=spread))
    } else {
        Duration::ZERO
    };
    delay.saturating_add(jitter).min(max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, max_ms: u64, exponential: bool) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            exponential,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_retry_delay_basic() {
        let base = Duration::from_millis(100);

        assert_eq!(retry_delay(0, base), Duration::from_millis(100));
        assert_eq!(retry_delay(1, base), Duration::from_millis(200));
        assert_eq!(retry_delay(2, base), Duration::from_millis(400));
        assert_eq!(retry_delay(3, base), Duration::from_millis(800));
    }

    #[test]
    fn test_retry_delay_zero_base() {
        let base = Duration::ZERO;

        assert_eq!(retry_delay(0, base), Duration::ZERO);
        assert_eq!(retry_delay(10, base), Duration::ZERO);
    }

    #[test]
    fn test_retry_delay_overflow_protection() {
        let base = Duration::from_secs(u64::MAX / 2);
        let delay = retry_delay(40, base);
        assert!(delay > Duration::ZERO);
    }

    #[test]
    fn backoff_is_capped() {
        let p = policy(1000, 3000, true);
        assert_eq!(backoff_delay(0, &p), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1, &p), Duration::from_millis(2000));
        assert_eq!(backoff_delay(2, &p), Duration::from_millis(3000));
        assert_eq!(backoff_delay(30, &p), Duration::from_millis(3000));
    }

    #[test]
    fn backoff_is_monotonic_and_bounded() {
        let p = policy(75, 5000, true);
        let delays: Vec<Duration> = (0..16).map(|i| backoff_delay(i, &p)).collect();

        for pair in delays.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert!(delays.iter().all(|d| *d <= p.max_delay));
    }

    #[test]
    fn constant_backoff_ignores_attempt() {
        let p = policy(250, 10_000, false);
        assert_eq!(backoff_delay(0, &p), Duration::from_millis(250));
        assert_eq!(backoff_delay(5, &p), Duration::from_millis(250));

        let clamped = policy(250, 100, false);
        assert_eq!(backoff_delay(3, &clamped), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_ten_percent_and_cap() {
        let delay = Duration::from_millis(1000);
        for _ in 0..100 {
            let jittered = with_jitter(delay, Duration::from_secs(60));
            assert!(jittered >= delay);
            assert!(jittered <= Duration::from_millis(1100));
        }

        assert_eq!(with_jitter(delay, delay), delay);
        assert_eq!(with_jitter(Duration::ZERO, delay), Duration::ZERO);
    }

    #[test]
    fn retryable_statuses() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(is_retryable_status(status), "{status} should be retryable");
        }
        for status in [200, 204, 400, 401, 403, 404, 409, 422, 501, 505] {
            assert!(!is_retryable_status(status), "{status} should not be retryable");
        }
    }
}
