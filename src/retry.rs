// src/retry.rs
//! Backoff retrier for outbound calls (feed fetches, AI completions).
//!
//! Policy: up to `tries` attempts. A retryable failure before the last attempt
//! sleeps `d + d * U(jitter_min, jitter_max)` and multiplies `d` by `backoff`.
//! The last failure is returned to the caller. Non-retryable failures are
//! returned on first occurrence without any delay.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Classification hooks the retrier needs from an error type.
pub trait Retryable {
    /// Whether another attempt may succeed.
    fn is_retryable(&self) -> bool;
    /// Connect/read timeouts get a one-line log on final failure.
    fn is_timeout(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub tries: u32,
    pub initial_delay: Duration,
    pub backoff: f64,
    pub jitter_min: f64,
    pub jitter_max: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            tries: 3,
            initial_delay: Duration::from_secs(5),
            backoff: 2.0,
            jitter_min: 0.1,
            jitter_max: 0.5,
        }
    }
}

impl RetryPolicy {
    pub fn new(tries: u32, initial_delay: Duration, backoff: f64) -> Self {
        Self {
            tries,
            initial_delay,
            backoff,
            ..Default::default()
        }
    }

    /// Single attempt, no sleeping.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    pub fn with_jitter(mut self, min: f64, max: f64) -> Self {
        self.jitter_min = min;
        self.jitter_max = max;
        self
    }

    /// Jittered wait for the given base delay.
    pub fn wait_for(&self, delay: Duration) -> Duration {
        let (lo, hi) = if self.jitter_min <= self.jitter_max {
            (self.jitter_min.max(0.0), self.jitter_max.max(0.0))
        } else {
            (self.jitter_max.max(0.0), self.jitter_min.max(0.0))
        };
        let factor = if hi > lo {
            rand::rng().random_range(lo..=hi)
        } else {
            lo
        };
        delay + delay.mul_f64(factor)
    }

    fn attempts(&self) -> u32 {
        self.tries.max(1)
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.backoff.max(0.0))
    }
}

/// Run `operation` under `policy`. `op_name` is used for log context only.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display + fmt::Debug,
{
    let tries = policy.attempts();
    let mut delay = policy.initial_delay;
    let mut attempt = 1u32;

    loop {
        let err = match operation().await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        if !err.is_retryable() {
            return Err(err);
        }

        if attempt >= tries {
            if err.is_timeout() {
                error!(op = op_name, tries, error = %err, "giving up after timeouts");
            } else {
                error!(
                    op = op_name,
                    attempt,
                    tries,
                    error = ?err,
                    "last attempt failed"
                );
            }
            return Err(err);
        }

        let wait = policy.wait_for(delay);
        warn!(
            op = op_name,
            attempt,
            tries,
            error = %err,
            wait_secs = wait.as_secs_f64(),
            "attempt failed, retrying"
        );
        tokio::time::sleep(wait).await;
        delay = policy.next_delay(delay);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky {
        retryable: bool,
    }

    impl fmt::Display for Flaky {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "flaky(retryable={})", self.retryable)
        }
    }

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    #[test]
    fn wait_stays_inside_jitter_band() {
        let p = RetryPolicy::default();
        for _ in 0..200 {
            let w = p.wait_for(Duration::from_secs(10));
            assert!(w >= Duration::from_secs(11), "{w:?}");
            assert!(w <= Duration::from_secs(15), "{w:?}");
        }
    }

    #[test]
    fn zero_tries_means_one_attempt() {
        let p = RetryPolicy::new(0, Duration::from_secs(1), 2.0);
        assert_eq!(p.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let p = RetryPolicy::new(3, Duration::from_millis(100), 2.0);
        let out: Result<u32, Flaky> = retry_with_backoff(&p, "test", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(Flaky { retryable: true })
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(out.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_fails_fast_without_sleep() {
        let calls = &AtomicU32::new(0);
        let p = RetryPolicy::default();
        let t0 = tokio::time::Instant::now();
        let out: Result<(), Flaky> = retry_with_backoff(&p, "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Flaky { retryable: false })
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(t0.elapsed(), Duration::ZERO);
    }
}
