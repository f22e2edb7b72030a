//! Bounded retry around fallible async operations.
//!
//! Only faults whose [`FaultKind`] is in the policy's retryable set are
//! retried; anything else is returned after the first attempt without
//! touching the budget.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::AcquisitionError;
use crate::fault::{Classify, FaultKind, FaultSet};

/// Default retry budget for soft transient faults on data calls.
pub const DEFAULT_TRANSIENT_RETRIES: u32 = 5;

/// Default retry budget for the credential refresh call.
pub const DEFAULT_REFRESH_RETRIES: u32 = 2;

/// Backoff strategy between retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed {
        /// Delay between retries.
        delay: Duration,
    },
    /// Uses an exponential delay between retries.
    ///
    /// The delay is calculated as `base * (factor ^ attempt)`.
    Exponential {
        /// The initial backoff duration.
        base: Duration,
        /// The multiplicative factor for each subsequent retry.
        factor: f64,
        /// The maximum duration to wait between retries.
        max: Duration,
        /// Whether to apply random jitter (+/- 50%) to the delay.
        jitter: bool,
    },
}

impl Backoff {
    /// Exponential backoff starting at `base`, capped at `max`, with jitter.
    pub fn jittered(base: Duration, max: Duration) -> Self {
        Self::Exponential {
            base,
            factor: 2.0,
            max,
            jitter: true,
        }
    }

    /// Calculate the delay for a given retry attempt (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let seconds = base.as_secs_f64() * factor.powi(exponent);
                let capped = Duration::from_secs_f64(seconds.min(max.as_secs_f64()));
                if !jitter {
                    return capped;
                }

                let jitter_ms = (capped.as_millis() as f64 * 0.5) as u64;
                let offset = fastrand::u64(0..=(jitter_ms * 2));
                let total_ms = capped.as_millis() as i64 + (offset as i64 - jitter_ms as i64);
                Duration::from_millis(total_ms.max(0) as u64)
            }
        }
    }
}

/// Retry budget, eligible fault kinds and optional pacing.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries. Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// Fault kinds that consume budget instead of failing immediately.
    pub retryable: FaultSet,
    /// Delay between attempts. `None` retries immediately.
    pub backoff: Option<Backoff>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::transient(DEFAULT_TRANSIENT_RETRIES)
    }
}

impl RetryPolicy {
    /// Retry soft transient faults only, without delay.
    pub fn transient(max_retries: u32) -> Self {
        Self {
            max_retries,
            retryable: FaultSet::soft_transient(),
            backoff: None,
        }
    }

    /// Policy used around the token refresh call.
    pub fn refresh() -> Self {
        Self::transient(DEFAULT_REFRESH_RETRIES)
    }

    /// Never retry.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            retryable: FaultSet::empty(),
            backoff: None,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn should_retry(&self, kind: FaultKind) -> bool {
        self.retryable.contains(kind)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        self.backoff.map(|backoff| backoff.delay(attempt))
    }
}

/// Outcome of a failed [`RetryExecutor::execute`] call.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The fault was not retryable; returned after the attempt that raised it.
    Fatal(E),
    /// Every attempt failed with a retryable fault.
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            Self::Fatal(error) => error,
            Self::Exhausted { last, .. } => last,
        }
    }

    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fatal(error) => error.fmt(f),
            Self::Exhausted { attempts, last } => {
                write!(f, "retries exhausted after {attempts} attempts: {last}")
            }
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fatal(error) => error.source(),
            Self::Exhausted { last, .. } => Some(last),
        }
    }
}

impl From<RetryError<AcquisitionError>> for AcquisitionError {
    fn from(error: RetryError<AcquisitionError>) -> Self {
        match error {
            RetryError::Fatal(error) => error,
            RetryError::Exhausted { attempts, last } => Self::RetriesExhausted {
                attempts,
                source: Box::new(last),
            },
        }
    }
}

/// Runs an operation until it succeeds, hits a non-retryable fault, or
/// spends the retry budget.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke `operation` with the 0-based attempt index.
    ///
    /// `on_retry(attempt, &error)` is called before every re-invocation.
    pub async fn execute<T, E, F, Fut, R>(
        &self,
        mut operation: F,
        mut on_retry: R,
    ) -> Result<T, RetryError<E>>
    where
        E: Classify,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(u32, &E),
    {
        let mut attempt: u32 = 0;
        loop {
            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !self.policy.should_retry(error.fault_kind()) {
                return Err(RetryError::Fatal(error));
            }
            if attempt >= self.policy.max_retries {
                return Err(RetryError::Exhausted {
                    attempts: attempt + 1,
                    last: error,
                });
            }

            on_retry(attempt, &error);
            if let Some(delay) = self.policy.delay_for_attempt(attempt) {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    /// [`execute`](Self::execute) with a `warn!` per retried fault.
    pub async fn execute_logged<T, F, Fut>(
        &self,
        label: &str,
        operation: F,
    ) -> Result<T, AcquisitionError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AcquisitionError>>,
    {
        let max_retries = self.policy.max_retries;
        self.execute(operation, |attempt, error: &AcquisitionError| {
            warn!(
                call = label,
                attempt = attempt + 1,
                max_retries,
                fault = %error.fault_kind(),
                error = %error,
                "retrying after transient fault"
            );
        })
        .await
        .map_err(AcquisitionError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::HttpError;

    fn transient() -> AcquisitionError {
        AcquisitionError::from(HttpError::timeout("open timeout"))
    }

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::Fixed {
            delay: Duration::from_millis(100),
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(10), Duration::from_millis(100));
    }

    #[test]
    fn test_exponential_backoff() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_secs(1),
            jitter: false,
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(backoff.delay(4), Duration::from_secs(1)); // capped
    }

    #[test]
    fn jittered_backoff_stays_within_half_of_base() {
        let backoff = Backoff::jittered(Duration::from_millis(100), Duration::from_secs(1));
        for attempt in 0..5 {
            let expected = (100.0 * 2_f64.powi(attempt as i32)).min(1000.0);
            let delay_ms = backoff.delay(attempt).as_millis() as f64;
            assert!(delay_ms >= expected * 0.49, "attempt={attempt} delay={delay_ms}");
            assert!(delay_ms <= expected * 1.51, "attempt={attempt} delay={delay_ms}");
        }
    }

    #[test]
    fn default_policy_retries_transient_faults_five_times_without_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, DEFAULT_TRANSIENT_RETRIES);
        assert!(policy.should_retry(FaultKind::SoftTransient));
        assert!(!policy.should_retry(FaultKind::HardAuth));
        assert!(!policy.should_retry(FaultKind::HardOther));
        assert_eq!(policy.delay_for_attempt(0), None);
        assert_eq!(RetryPolicy::refresh().max_retries, DEFAULT_REFRESH_RETRIES);
    }

    #[tokio::test]
    async fn attempt_index_is_monotonic_from_zero() {
        let executor = RetryExecutor::new(RetryPolicy::transient(3));
        let mut seen = Vec::new();
        let result: Result<(), _> = executor
            .execute(
                |attempt| {
                    seen.push(attempt);
                    async { Err(transient()) }
                },
                |_, _| {},
            )
            .await;

        assert!(result.expect_err("always fails").is_exhausted());
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn on_retry_is_called_once_per_retry() {
        let executor = RetryExecutor::new(RetryPolicy::transient(5));
        let mut retries = Vec::new();
        let value = executor
            .execute(
                |attempt| async move {
                    if attempt < 2 {
                        Err(transient())
                    } else {
                        Ok(attempt)
                    }
                },
                |attempt, _| retries.push(attempt),
            )
            .await
            .expect("third attempt succeeds");

        assert_eq!(value, 2);
        assert_eq!(retries, vec![0, 1]);
    }

    #[tokio::test]
    async fn exhausted_budget_is_wrapped() {
        let executor = RetryExecutor::new(RetryPolicy::transient(1));
        let error = executor
            .execute_logged("test", |_| async { Err::<(), _>(transient()) })
            .await
            .expect_err("budget spent");

        assert!(matches!(
            error,
            AcquisitionError::RetriesExhausted { attempts: 2, .. }
        ));
    }

    #[tokio::test]
    async fn fixed_backoff_sleeps_between_attempts() {
        let executor = RetryExecutor::new(
            RetryPolicy::transient(2).with_backoff(Backoff::Fixed {
                delay: Duration::from_millis(5),
            }),
        );
        let started = std::time::Instant::now();
        let _ = executor
            .execute(|_| async { Err::<(), _>(transient()) }, |_, _| {})
            .await;
        assert!(started.elapsed() >= Duration::from_millis(10));
    }
}
