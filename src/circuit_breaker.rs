//! Circuit breaker gating every engine call.
//!
//! CLOSED counts consecutive failures and opens at `max_failures`. OPEN
//! short-circuits with a retry-after hint until `timeout` has passed, then
//! admits exactly one HALF_OPEN trial: success closes, failure reopens.
//! The breaker never retries; see [`crate::retry`] for that.

use crate::config::BreakerSettings;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Whether an error says something about the health of the wrapped service.
pub trait TripsBreaker {
    fn trips_breaker(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub enum BreakerError<E> {
    /// Short-circuited; the wrapped call was not made.
    Open { retry_after: Duration },
    Inner(E),
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    trial_in_flight: bool,
}

/// Snapshot for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerStatus {
    pub state: CircuitState,
    pub failure_count: u32,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

/// Permission to make one call. A cancelled trial counts as a failure so the
/// breaker cannot stay in HALF_OPEN; any other cancelled call settles without
/// touching the counts.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.on_failure(true);
        }
    }
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                trial_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // State stays consistent across a panic: every mutation is a plain
        // field store.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> BreakerStatus {
        let inner = self.lock();
        BreakerStatus {
            state: inner.state,
            failure_count: inner.failure_count,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.status().state
    }

    /// Run `f` if the breaker admits a call.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: TripsBreaker,
    {
        let mut admission = self.admit().map_err(|retry_after| BreakerError::Open { retry_after })?;

        let result = f().await;
        admission.settled = true;
        match &result {
            Err(e) if e.trips_breaker() => self.on_failure(admission.trial),
            _ => self.on_success(admission.trial),
        }
        result.map_err(BreakerError::Inner)
    }

    fn admit(&self) -> Result<Admission<'_>, Duration> {
        let mut inner = self.lock();
        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let elapsed = inner.last_failure_time.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
                if elapsed < self.settings.timeout {
                    return Err(self.settings.timeout - elapsed);
                }
                info!("Circuit breaker OPEN -> HALF_OPEN, admitting trial call");
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(Duration::ZERO);
                }
                inner.trial_in_flight = true;
                true
            }
        };
        Ok(Admission {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        if trial {
            inner.trial_in_flight = false;
        }
        if inner.state == CircuitState::HalfOpen {
            info!("Circuit breaker HALF_OPEN -> CLOSED");
            inner.state = CircuitState::Closed;
        }
        inner.failure_count = 0;
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.lock();
        if trial {
            inner.trial_in_flight = false;
        }
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.settings.max_failures {
                    warn!(failures = inner.failure_count, "Circuit breaker CLOSED -> OPEN");
                    inner.state = CircuitState::Open;
                    inner.last_failure_time = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count += 1;
                warn!("Circuit breaker trial failed, HALF_OPEN -> OPEN");
                inner.state = CircuitState::Open;
                inner.last_failure_time = Some(Instant::now());
            }
            // A call admitted while CLOSED finished after the breaker opened.
            CircuitState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    struct Boom(bool);

    impl TripsBreaker for Boom {
        fn trips_breaker(&self) -> bool {
            self.0
        }
    }

    fn breaker(max_failures: u32, timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(BreakerSettings {
            max_failures,
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    async fn fail(b: &CircuitBreaker, calls: &AtomicUsize) -> Result<(), BreakerError<Boom>> {
        b.call(move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Boom(true))
        })
        .await
    }

    #[tokio::test]
    async fn test_opens_after_max_failures_and_short_circuits() {
        let b = breaker(3, 10_000);
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            assert!(matches!(fail(&b, &calls).await, Err(BreakerError::Inner(_))));
        }
        assert_eq!(b.state(), CircuitState::Open);

        match fail(&b, &calls).await {
            Err(BreakerError::Open { retry_after }) => assert!(retry_after > Duration::ZERO),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let b = breaker(1, 20);
        let calls = AtomicUsize::new(0);
        let _ = fail(&b, &calls).await;
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let ok: Result<u8, BreakerError<Boom>> = b.call(|| async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));
        assert_eq!(b.status(), BreakerStatus { state: CircuitState::Closed, failure_count: 0 });
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let b = breaker(1, 20);
        let calls = AtomicUsize::new(0);
        let _ = fail(&b, &calls).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(matches!(fail(&b, &calls).await, Err(BreakerError::Inner(_))));
        assert_eq!(b.state(), CircuitState::Open);
        assert!(matches!(fail(&b, &calls).await, Err(BreakerError::Open { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_trial_while_half_open() {
        let b = Arc::new(breaker(1, 10));
        let calls = AtomicUsize::new(0);
        let _ = fail(&b, &calls).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let b = b.clone();
            tokio::spawn(async move {
                b.call(move || async move {
                    let _ = wait.await;
                    Ok::<_, Boom>(())
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let second: Result<(), BreakerError<Boom>> = b.call(|| async { Ok(()) }).await;
        assert!(matches!(second, Err(BreakerError::Open { .. })));

        release.send(()).unwrap();
        assert!(trial.await.unwrap().is_ok());
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_cancelled_calls_do_not_count_while_closed() {
        let b = breaker(2, 10_000);
        for _ in 0..3 {
            let pending = b.call(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, Boom>(())
            });
            assert!(tokio::time::timeout(Duration::from_millis(5), pending).await.is_err());
        }
        assert_eq!(b.status(), BreakerStatus { state: CircuitState::Closed, failure_count: 0 });
    }

    #[tokio::test]
    async fn test_cancelled_trial_reopens() {
        let b = breaker(1, 10);
        let calls = AtomicUsize::new(0);
        let _ = fail(&b, &calls).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let trial = b.call(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, Boom>(())
        });
        assert!(tokio::time::timeout(Duration::from_millis(5), trial).await.is_err());
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_non_tripping_errors_count_as_success() {
        let b = breaker(1, 10_000);
        let r: Result<(), BreakerError<Boom>> = b.call(|| async { Err(Boom(false)) }).await;
        assert!(matches!(r, Err(BreakerError::Inner(Boom(false)))));
        assert_eq!(b.state(), CircuitState::Closed);
    }
}
