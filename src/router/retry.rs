// src/router/retry.rs

//! Exponential backoff for collaborator calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::FleetError;
use crate::router::lanes::LaneError;
use crate::store::StoreError;

/// Errors that may succeed if the same call is repeated later.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }
}

impl Transient for LaneError {
    fn is_transient(&self) -> bool {
        LaneError::is_transient(self)
    }
}

/// Bounded retry with exponential backoff.
///
/// Attempt `n` (0-based) waits `initial_delay * multiplier^n`, capped at
/// `max_delay`, before the next call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that calls once and never waits.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    ///
    /// Permanent errors are returned immediately; exhausting the retries on a
    /// transient error yields [`FleetError::RetriesExhausted`].
    pub async fn run<T, E, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T, FleetError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + std::fmt::Display + Into<FleetError>,
    {
        let mut retries = 0u32;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && retries < self.max_retries => {
                    let delay = self.delay_for(retries);
                    warn!(
                        operation,
                        retry = retries + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                Err(err) if err.is_transient() => {
                    return Err(FleetError::RetriesExhausted {
                        operation,
                        attempts: retries + 1,
                        last_error: err.to_string(),
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(20), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let value = fast(3)
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(StoreError::Unavailable("down".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_retries() {
        let calls = AtomicU32::new(0);
        let err = fast(2)
            .run("publish", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(LaneError::Unavailable("down".into())) }
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FleetError::RetriesExhausted { operation: "publish", attempts: 3, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = fast(5)
            .run("insert", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StoreError::Conflict("dup".into())) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, FleetError::Store(StoreError::Conflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
