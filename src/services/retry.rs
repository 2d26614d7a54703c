//! Bounded retry with exponential backoff for refund calls.

use crate::payments::types::RefundOutcome;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Upper bound on a single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Delay to wait after the `attempt`-th failure (1-based): `base * 2^(attempt - 1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 2u32.saturating_pow(attempt - 1);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

/// One refund call within an orchestration run. Kept in memory only; the
/// list ends up in the payment's refund evidence.
#[derive(Debug, Clone, Serialize)]
pub struct RefundAttempt {
    pub attempt_number: u32,
    pub outcome: &'static str,
    pub last_error: Option<String>,
    pub next_backoff_ms: Option<u64>,
}

#[derive(Debug)]
pub struct RetryReport {
    /// Outcome of the last attempt made.
    pub outcome: RefundOutcome,
    pub attempts: Vec<RefundAttempt>,
    /// True when every attempt came back retryable.
    pub exhausted: bool,
}

/// Calls `op` until it returns something other than
/// [`RefundOutcome::Retryable`] or `max_attempts` calls have been made,
/// sleeping [`backoff_delay`] between calls.
pub async fn retry_with_backoff<F, Fut>(max_attempts: u32, base: Duration, mut op: F) -> RetryReport
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = RefundOutcome>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempts = Vec::new();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let outcome = op(attempt).await;

        let RefundOutcome::Retryable { error, .. } = &outcome else {
            attempts.push(RefundAttempt {
                attempt_number: attempt,
                outcome: outcome.label(),
                last_error: None,
                next_backoff_ms: None,
            });
            return RetryReport {
                outcome,
                attempts,
                exhausted: false,
            };
        };

        if attempt >= max_attempts {
            attempts.push(RefundAttempt {
                attempt_number: attempt,
                outcome: outcome.label(),
                last_error: Some(error.to_string()),
                next_backoff_ms: None,
            });
            return RetryReport {
                outcome,
                attempts,
                exhausted: true,
            };
        }

        let delay = backoff_delay(base, attempt);
        warn!(
            attempt = attempt,
            max_attempts = max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "refund attempt failed, retrying"
        );
        attempts.push(RefundAttempt {
            attempt_number: attempt,
            outcome: outcome.label(),
            last_error: Some(error.to_string()),
            next_backoff_ms: Some(delay.as_millis() as u64),
        });
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::error::PaymentError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn transient() -> RefundOutcome {
        RefundOutcome::Retryable {
            error: PaymentError::unavailable("payos", "HTTP 500"),
            evidence: None,
        }
    }

    #[test]
    fn backoff_delay_doubles_from_base() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 0), Duration::ZERO);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, 40), MAX_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_first_non_retryable_outcome() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let report = retry_with_backoff(3, Duration::from_millis(500), move |n| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    transient()
                } else {
                    RefundOutcome::succeeded(serde_json::json!({"code": "00"}))
                }
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!report.exhausted);
        assert_eq!(report.attempts.len(), 2);
        assert_eq!(report.attempts[0].next_backoff_ms, Some(500));
        assert!(matches!(report.outcome, RefundOutcome::Succeeded { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_budget_and_waits_between_attempts() {
        let start = tokio::time::Instant::now();
        let report = retry_with_backoff(3, Duration::from_millis(500), |_| async { transient() }).await;

        assert!(report.exhausted);
        assert_eq!(report.attempts.len(), 3);
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }
}
