//! Bounded-retry engine.
//!
//! Every RPC call made against the node or the remote signer goes through
//! here. Failed attempts are retried with exponential backoff - delay grows
//! as `initial * factor^(attempt - 1)`, capped at `maximum` - until the
//! operation either succeeds or the supplied cancellation token fires.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::settings::RetrySettings;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        Self { initial_delay: s.initial_delay, max_delay: s.max_delay, factor: s.factor }
    }
}

impl RetryPolicy {
    /// Delay to wait before retrying the `attempt`-th failed attempt (1-indexed:
    /// `attempt == 1` is the delay applied after the first failure).
    pub fn failure_delay(&self, attempt: u32) -> Duration {
        failure_delay(self.initial_delay, self.factor, self.max_delay, attempt)
    }
}

pub fn failure_delay(initial: Duration, factor: f64, maximum: Duration, attempt: u32) -> Duration {
    let scaled = initial.as_secs_f64() * factor.powi(attempt.saturating_sub(1) as i32);
    let capped = scaled.min(maximum.as_secs_f64()).max(0.0);
    Duration::from_secs_f64(capped)
}

/// Retries `attempt_fn` until it succeeds or `cancellation` fires, applying
/// the policy's backoff between attempts. `attempt_fn` receives the 1-indexed
/// attempt number, for logging.
pub async fn retry<T, Fut, F>(
    policy: &RetryPolicy,
    cancellation: &CancellationToken,
    name: &str,
    mut attempt_fn: F,
) -> anyhow::Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt: u32 = 1;
    loop {
        let result = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                return Err(anyhow::anyhow!("{name}: cancelled before attempt {attempt}"));
            }
            result = attempt_fn(attempt) => result,
        };

        match result {
            Ok(value) => {
                crate::metrics::RPC_RETRY_COUNTER.with_label_values(&[name, "ok"]).inc();
                return Ok(value);
            },
            Err(error) => {
                crate::metrics::RPC_RETRY_COUNTER.with_label_values(&[name, "error"]).inc();
                let delay = policy.failure_delay(attempt);
                tracing::error!(
                    request_name = name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "{name}: attempt {attempt} failed: {error}",
                );
                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => {
                        return Err(anyhow::anyhow!("{name}: cancelled while waiting to retry attempt {attempt}"));
                    }
                    _ = tokio::time::sleep(delay) => {},
                }
                attempt = attempt.saturating_add(1);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn failure_delay_grows_exponentially_and_caps() {
        let initial = Duration::from_millis(100);
        let factor = 2.0;
        let max = Duration::from_secs(30);

        assert_eq!(failure_delay(initial, factor, max, 1), Duration::from_millis(100));
        assert_eq!(failure_delay(initial, factor, max, 2), Duration::from_millis(200));
        assert_eq!(failure_delay(initial, factor, max, 3), Duration::from_millis(400));
        // 100ms * 2^9 = 51200ms, capped to 30s
        assert_eq!(failure_delay(initial, factor, max, 10), max);
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        };
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let result = retry(&policy, &token, "test", |attempt| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(anyhow::anyhow!("not yet"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_stops_when_cancelled() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5),
            factor: 1.0,
        };
        let token = CancellationToken::new();
        token.cancel();

        let result: anyhow::Result<()> =
            retry(&policy, &token, "test", |_attempt| async { Err(anyhow::anyhow!("never")) }).await;

        assert!(result.is_err());
    }
}
