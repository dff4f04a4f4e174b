//! Bounded-concurrency gate
//!
//! Every outbound unit of work (CDN upload, inline fetch) runs through a
//! [`ConcurrencyLimiter`]. Permits come from a fair semaphore, so waiters are
//! admitted in arrival order once the gate is saturated.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Default limit for CDN provider calls.
pub const DEFAULT_CDN_CONCURRENCY: usize = 4;

/// Default limit for inline fetch-and-encode work.
pub const DEFAULT_INLINE_CONCURRENCY: usize = 8;

/// Limiter configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LimiterError {
    #[error("concurrency limit must be at least 1")]
    ZeroLimit,

    #[error("limiter {name:?} already in use with limit {current}; reconfiguration rejected")]
    AlreadyStarted { name: String, current: usize },
}

enum GateState {
    /// Configured but no unit has run yet; the limit may still change.
    Pending(usize),
    Active(Arc<Semaphore>),
}

/// Caps how many units of work run at once across every caller sharing it.
///
/// The limit can be adjusted with [`configure`](Self::configure) until the
/// first call to [`run`](Self::run); afterwards it is fixed.
pub struct ConcurrencyLimiter {
    name: String,
    limit: AtomicUsize,
    state: Mutex<GateState>,
    in_flight: AtomicUsize,
}

impl ConcurrencyLimiter {
    /// Create a limiter allowing at most `limit` concurrent units.
    pub fn new(name: impl Into<String>, limit: usize) -> Result<Self, LimiterError> {
        if limit == 0 {
            return Err(LimiterError::ZeroLimit);
        }
        Ok(Self {
            name: name.into(),
            limit: AtomicUsize::new(limit),
            state: Mutex::new(GateState::Pending(limit)),
            in_flight: AtomicUsize::new(0),
        })
    }

    /// Limiter for CDN calls with the default limit.
    pub fn cdn() -> Self {
        Self {
            name: "cdn".to_string(),
            limit: AtomicUsize::new(DEFAULT_CDN_CONCURRENCY),
            state: Mutex::new(GateState::Pending(DEFAULT_CDN_CONCURRENCY)),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Limiter for inline encoding with the default limit.
    pub fn inline() -> Self {
        Self {
            name: "inline".to_string(),
            limit: AtomicUsize::new(DEFAULT_INLINE_CONCURRENCY),
            state: Mutex::new(GateState::Pending(DEFAULT_INLINE_CONCURRENCY)),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Change the limit. Only allowed before the first unit has run.
    pub fn configure(&self, limit: usize) -> Result<(), LimiterError> {
        if limit == 0 {
            return Err(LimiterError::ZeroLimit);
        }
        let mut state = self.state.lock();
        match *state {
            GateState::Pending(_) => {
                *state = GateState::Pending(limit);
                self.limit.store(limit, Ordering::SeqCst);
                Ok(())
            }
            GateState::Active(_) => Err(LimiterError::AlreadyStarted {
                name: self.name.clone(),
                current: self.limit.load(Ordering::SeqCst),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_concurrency(&self) -> usize {
        self.limit.load(Ordering::SeqCst)
    }

    /// Units currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn semaphore(&self) -> Arc<Semaphore> {
        let mut state = self.state.lock();
        match &*state {
            GateState::Active(semaphore) => semaphore.clone(),
            GateState::Pending(limit) => {
                let semaphore = Arc::new(Semaphore::new(*limit));
                *state = GateState::Active(semaphore.clone());
                semaphore
            }
        }
    }

    /// Run `work` once a slot is free. Excess callers queue in FIFO order.
    pub async fn run<F, T>(&self, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let semaphore = self.semaphore();
        // The semaphore is never closed, so acquisition cannot fail.
        let _permit = semaphore.acquire().await.ok();
        let _guard = InFlightGuard::enter(&self.in_flight);
        work.await
    }
}

impl std::fmt::Debug for ConcurrencyLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyLimiter")
            .field("name", &self.name)
            .field("limit", &self.max_concurrency())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;
    use std::time::Duration;

    #[test]
    fn test_zero_limit_rejected() {
        assert_eq!(
            ConcurrencyLimiter::new("x", 0).unwrap_err(),
            LimiterError::ZeroLimit
        );
        let limiter = ConcurrencyLimiter::cdn();
        assert_eq!(limiter.configure(0).unwrap_err(), LimiterError::ZeroLimit);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(ConcurrencyLimiter::cdn().max_concurrency(), DEFAULT_CDN_CONCURRENCY);
        assert_eq!(
            ConcurrencyLimiter::inline().max_concurrency(),
            DEFAULT_INLINE_CONCURRENCY
        );
    }

    #[tokio::test]
    async fn test_configure_before_first_use_only() {
        let limiter = ConcurrencyLimiter::new("cdn", 4).unwrap();
        limiter.configure(2).unwrap();
        limiter.configure(3).unwrap();
        assert_eq!(limiter.max_concurrency(), 3);

        assert_eq!(limiter.run(async { 7 }).await, 7);

        let err = limiter.configure(10).unwrap_err();
        assert_eq!(
            err,
            LimiterError::AlreadyStarted {
                name: "cdn".to_string(),
                current: 3
            }
        );
        assert_eq!(limiter.max_concurrency(), 3);
    }

    #[tokio::test]
    async fn test_never_exceeds_limit_and_all_complete() {
        let limiter = ConcurrencyLimiter::new("test", 2).unwrap();
        let peak = AtomicUsize::new(0);

        let units = (0..5).map(|i| {
            let limiter = &limiter;
            let peak = &peak;
            async move {
                limiter
                    .run(async move {
                        peak.fetch_max(limiter.in_flight(), Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        i
                    })
                    .await
            }
        });

        let results = join_all(units).await;
        assert_eq!(results, vec![0, 1, 2, 3, 4]);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_fifo_admission_when_saturated() {
        let limiter = ConcurrencyLimiter::new("fifo", 2).unwrap();
        let started = Mutex::new(Vec::new());

        let units = (0..5).map(|i| {
            let limiter = &limiter;
            let started = &started;
            async move {
                limiter
                    .run(async move {
                        started.lock().push(i);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    })
                    .await
            }
        });
        join_all(units).await;

        assert_eq!(*started.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_shared_across_tasks() {
        let limiter = Arc::new(ConcurrencyLimiter::new("shared", 1).unwrap());
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    let inner = limiter.clone();
                    limiter
                        .run(async move {
                            peak.fetch_max(inner.in_flight(), Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(5)).await;
                        })
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
