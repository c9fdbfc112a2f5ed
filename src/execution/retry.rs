use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use super::Clock;

/// Attempt limit and pause between failed attempts, fixed per run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryBudget {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Result of running an operation under a [`RetryBudget`]
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T, E> {
    Success { value: T, attempts: u32 },
    Exhausted { attempts: u32, last_error: E },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. } | RetryOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Run `op` until it succeeds, fails permanently or the budget is spent
///
/// `op` receives the 1-based attempt number. An error for which `retryable`
/// returns false ends the run at once. The clock sleeps for the backoff
/// between a failure and the next attempt; there is no sleep after the final
/// failure. Deciding what to do on exhaustion is left to the caller.
pub async fn retry_bounded<T, E, F, Fut, R>(
    budget: &RetryBudget,
    clock: &dyn Clock,
    retryable: R,
    mut op: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: Display,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                return RetryOutcome::Success {
                    value,
                    attempts: attempt,
                }
            }
            Err(e) if !retryable(&e) => {
                tracing::debug!("Attempt {} failed permanently: {}", attempt, e);
                return RetryOutcome::Exhausted {
                    attempts: attempt,
                    last_error: e,
                };
            }
            Err(e) if attempt >= budget.max_attempts => {
                return RetryOutcome::Exhausted {
                    attempts: attempt,
                    last_error: e,
                }
            }
            Err(e) => {
                tracing::debug!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}...",
                    attempt,
                    budget.max_attempts,
                    e,
                    budget.backoff
                );
                clock.sleep(budget.backoff).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::mock::RecordingClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn always<E>(_: &E) -> bool {
        true
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let clock = RecordingClock::new();
        let budget = RetryBudget::new(3, Duration::from_secs(2));

        let outcome: RetryOutcome<u32, String> =
            retry_bounded(&budget, &clock, always, |attempt| async move { Ok(attempt) }).await;

        assert_eq!(
            outcome,
            RetryOutcome::Success {
                value: 1,
                attempts: 1
            }
        );
        assert!(outcome.is_success());
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_success_after_failures() {
        let clock = RecordingClock::new();
        let budget = RetryBudget::new(3, Duration::from_secs(2));

        let outcome = retry_bounded(&budget, &clock, always, |attempt| async move {
            if attempt < 3 {
                Err(format!("fail {}", attempt))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(
            outcome,
            RetryOutcome::Success {
                value: "done",
                attempts: 3
            }
        );
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2); 2]);
    }

    #[tokio::test]
    async fn test_exhausted_stops_at_budget() {
        let clock = RecordingClock::new();
        let budget = RetryBudget::new(4, Duration::from_millis(500));
        let calls = AtomicU32::new(0);

        let outcome: RetryOutcome<(), String> =
            retry_bounded(&budget, &clock, always, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("fail {}", attempt)) }
            })
            .await;

        assert_eq!(
            outcome,
            RetryOutcome::Exhausted {
                attempts: 4,
                last_error: "fail 4".to_string()
            }
        );
        assert!(!outcome.is_success());
        assert_eq!(outcome.attempts(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(clock.sleeps().len(), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_stops_without_backoff() {
        let clock = RecordingClock::new();
        let budget = RetryBudget::new(3, Duration::from_secs(2));
        let calls = AtomicU32::new(0);

        let outcome: RetryOutcome<(), String> = retry_bounded(
            &budget,
            &clock,
            |e: &String| e.starts_with("busy"),
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 1 {
                        Err("busy".to_string())
                    } else {
                        Err("rejected".to_string())
                    }
                }
            },
        )
        .await;

        assert_eq!(
            outcome,
            RetryOutcome::Exhausted {
                attempts: 2,
                last_error: "rejected".to_string()
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
    }

    #[test]
    fn test_budget_has_at_least_one_attempt() {
        assert_eq!(RetryBudget::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn test_single_attempt_budget_never_sleeps() {
        let clock = RecordingClock::new();
        let budget = RetryBudget::new(1, Duration::from_secs(2));

        let outcome: RetryOutcome<(), &str> = tokio_test::block_on(retry_bounded(
            &budget,
            &clock,
            always,
            |_| async { Err("boom") },
        ));

        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 1, .. }));
        assert!(clock.sleeps().is_empty());
    }
}
