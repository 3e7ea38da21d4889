//! Bounded exponential backoff for network and worker calls.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff schedule.
///
/// The operation runs once immediately; each failure sleeps for the next delay
/// until `max_attempts` total attempts have been made.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::network()
    }
}

impl RetryPolicy {
    /// Download policy: 4 attempts, 500ms doubling up to 8s.
    pub const fn network() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }

    /// Worker policy: 2 attempts, 1s apart.
    pub const fn worker() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(1),
            multiplier: 1.0,
        }
    }

    /// A single attempt.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay to sleep after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if secs.is_finite() {
            Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
        } else {
            self.max_delay
        }
    }

    /// The complete delay schedule.
    pub fn delays(&self) -> Vec<Duration> {
        (1..self.max_attempts.max(1))
            .map(|attempt| self.delay_after(attempt))
            .collect()
    }
}

/// Run `op` under `policy`, retrying while `is_retryable` accepts the error.
///
/// `on_retry(next_attempt, max_attempts, &error)` runs before each backoff
/// sleep. The last error is returned once attempts run out.
pub async fn retry<T, E, Op, Fut, P, R>(
    policy: RetryPolicy,
    is_retryable: P,
    mut on_retry: R,
    mut op: Op,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    R: FnMut(u32, u32, &E),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && is_retryable(&err) => {
                on_retry(attempt + 1, max_attempts, &err);
                tokio::time::sleep(policy.delay_after(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_network_schedule_is_bounded() {
        let delays = RetryPolicy::network().delays();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2)
            ]
        );
        let capped = RetryPolicy {
            max_attempts: 10,
            ..RetryPolicy::network()
        };
        assert!(capped.delays().iter().all(|d| *d <= Duration::from_secs(8)));
    }

    #[test]
    fn test_none_has_no_delays() {
        assert!(RetryPolicy::none().delays().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let attempts = Cell::new(0);
        let mut notices = Vec::new();
        let result: Result<u32, &str> = retry(
            RetryPolicy::network(),
            |_| true,
            |next, max, _| notices.push((next, max)),
            |attempt| {
                attempts.set(attempts.get() + 1);
                async move {
                    if attempt < 3 {
                        Err("flaky")
                    } else {
                        Ok(attempt)
                    }
                }
            },
        )
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(attempts.get(), 3);
        assert_eq!(notices, vec![(2, 4), (3, 4)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_stops_immediately() {
        let attempts = Cell::new(0);
        let result: Result<(), u16> = retry(
            RetryPolicy::network(),
            |status| *status >= 500,
            |_, _, _| {},
            |_| {
                attempts.set(attempts.get() + 1);
                async { Err(404) }
            },
        )
        .await;
        assert_eq!(result, Err(404));
        assert_eq!(attempts.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let result: Result<(), u32> = retry(
            RetryPolicy::worker(),
            |_| true,
            |_, _, _| {},
            |attempt| async move { Err(attempt) },
        )
        .await;
        assert_eq!(result, Err(2));
    }
}
