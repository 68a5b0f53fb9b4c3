//! Bounded pool of reusable OCR engines.
//!
//! Each engine is expensive to create (language data is located and verified
//! once, a scratch workspace is allocated) and must never be driven by two
//! callers at once. The pool pre-creates a fixed number of them and hands them
//! out one at a time:
//!
//! ```text
//!  acquire() ──▶ semaphore permit ──▶ pop idle engine ──▶ EngineLease
//!                                                            │ drop
//!  idle list ◀── push engine ◀── release permit ◀────────────┘
//! ```
//!
//! The semaphore holds exactly `size` permits, so at most `size` leases exist
//! at any instant and every permit holder is guaranteed to find an idle engine.
//! Release is tied to [`EngineLease`]'s `Drop`, so an engine comes back on
//! every exit path: success, `?` early return, or a panic unwinding through
//! the worker.
//!
//! Checkout, release and disposal all update the lease count under the idle
//! lock, so a shutdown racing an `acquire` either sees the lease or makes the
//! acquirer fail with [`ExtractError::PoolClosed`].

use crate::error::{EngineError, ExtractError};
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Fixed-size set of engines checked out under mutual exclusion.
pub struct EnginePool<E> {
    inner: Arc<PoolInner<E>>,
}

struct PoolInner<E> {
    size: usize,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<E>>,
    outstanding: AtomicUsize,
    returned: Notify,
    disposed: AtomicBool,
}

impl<E: Send + 'static> EnginePool<E> {
    /// Create a pool of `size` engines built by `factory(slot)`.
    ///
    /// Fails with [`ExtractError::InvalidConfig`] when `size` is zero and with
    /// [`ExtractError::EngineUnavailable`] when any engine cannot be created.
    pub fn new<F>(size: usize, mut factory: F) -> Result<Self, ExtractError>
    where
        F: FnMut(usize) -> Result<E, EngineError>,
    {
        if size == 0 {
            return Err(ExtractError::InvalidConfig(
                "Engine pool size must be ≥ 1".into(),
            ));
        }

        let mut engines = Vec::with_capacity(size);
        for slot in 0..size {
            let engine = factory(slot).map_err(|e| ExtractError::EngineUnavailable {
                detail: format!("engine {slot}: {e}"),
            })?;
            engines.push(engine);
        }
        info!("Engine pool ready: {} engines", size);

        Ok(Self {
            inner: Arc::new(PoolInner {
                size,
                permits: Arc::new(Semaphore::new(size)),
                idle: Mutex::new(engines),
                outstanding: AtomicUsize::new(0),
                returned: Notify::new(),
                disposed: AtomicBool::new(false),
            }),
        })
    }

    /// Wait for a free engine and check it out.
    ///
    /// Returns [`ExtractError::PoolClosed`] once [`EnginePool::shutdown`] has
    /// been called, including for callers that were already waiting.
    pub async fn acquire(&self) -> Result<EngineLease<E>, ExtractError> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| ExtractError::PoolClosed)?;

        // Checked under the idle lock so `shutdown` never disposes of the
        // engines while a checkout is half done.
        let engine = {
            let mut idle = self.inner.idle.lock();
            if self.inner.permits.is_closed() || self.inner.disposed.load(Ordering::SeqCst) {
                return Err(ExtractError::PoolClosed);
            }
            let engine = idle.pop().ok_or_else(|| {
                ExtractError::Internal("engine pool granted a permit with no idle engine".into())
            })?;
            self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
            engine
        };

        Ok(EngineLease {
            engine: Some(engine),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Refuse further acquisitions, wait for every outstanding lease to come
    /// back, then drop all engines. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.inner.permits.close();

        loop {
            let returned = self.inner.returned.notified();
            let outstanding = {
                let mut idle = self.inner.idle.lock();
                let outstanding = self.inner.outstanding.load(Ordering::SeqCst);
                if outstanding == 0 {
                    let engines = self.inner.dispose(&mut idle);
                    drop(idle);
                    if let Some(engines) = engines {
                        info!("Engine pool shut down, releasing {} engines", engines.len());
                    }
                    return;
                }
                outstanding
            };
            debug!("Engine pool shutdown waiting for {} leases", outstanding);
            returned.await;
        }
    }

    /// Like [`EnginePool::shutdown`], but stop waiting after `grace`.
    ///
    /// Leases still out at that point are detached: the idle engines are
    /// dropped now and each late lease drops its engine when it is released.
    /// Returns `true` if every lease came back in time.
    pub async fn shutdown_within(&self, grace: Duration) -> bool {
        if tokio::time::timeout(grace, self.shutdown()).await.is_ok() {
            return true;
        }

        let (engines, late) = {
            let mut idle = self.inner.idle.lock();
            let late = self.inner.outstanding.load(Ordering::SeqCst);
            (self.inner.dispose(&mut idle), late)
        };
        warn!(
            "Engine pool shutdown gave up after {:?}: {} leases still out, {} idle engines released",
            grace,
            late,
            engines.map_or(0, |e| e.len())
        );
        false
    }
}

impl<E> PoolInner<E> {
    /// Mark the pool disposed and hand back the idle engines, once.
    fn dispose(&self, idle: &mut Vec<E>) -> Option<Vec<E>> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(std::mem::take(idle))
        }
    }
}

impl<E> EnginePool<E> {
    /// Number of engines the pool was created with.
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Engines currently idle and ready to be acquired.
    pub fn available(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Leases currently checked out.
    pub fn in_use(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }
}

/// Exclusive access to one pooled engine; returns it to the pool on drop.
pub struct EngineLease<E> {
    engine: Option<E>,
    pool: Arc<PoolInner<E>>,
    // Dropped after `Drop::drop` has pushed the engine back, so the next
    // permit holder always finds an idle engine.
    _permit: OwnedSemaphorePermit,
}

impl<E> Deref for EngineLease<E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.engine.as_ref().expect("engine is present until the lease drops")
    }
}

impl<E> DerefMut for EngineLease<E> {
    fn deref_mut(&mut self) -> &mut E {
        self.engine.as_mut().expect("engine is present until the lease drops")
    }
}

impl<E> Drop for EngineLease<E> {
    fn drop(&mut self) {
        let stray = {
            let mut idle = self.pool.idle.lock();
            self.pool.outstanding.fetch_sub(1, Ordering::SeqCst);
            match self.engine.take() {
                Some(engine) if self.pool.disposed.load(Ordering::SeqCst) => Some(engine),
                Some(engine) => {
                    idle.push(engine);
                    None
                }
                None => None,
            }
        };
        // An engine returned after a detached shutdown is dropped here.
        drop(stray);
        self.pool.returned.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_pool(size: usize) -> EnginePool<usize> {
        EnginePool::new(size, |slot| Ok(slot)).unwrap()
    }

    #[test]
    fn zero_size_is_rejected() {
        let err = EnginePool::<usize>::new(0, |slot| Ok(slot)).err().unwrap();
        assert!(matches!(err, ExtractError::InvalidConfig(_)));
    }

    #[test]
    fn factory_failure_is_engine_unavailable() {
        let err = EnginePool::<usize>::new(3, |slot| {
            if slot == 2 {
                Err(EngineError::Failed("missing traineddata".into()))
            } else {
                Ok(slot)
            }
        })
        .err()
        .unwrap();
        match err {
            ExtractError::EngineUnavailable { detail } => {
                assert!(detail.contains("engine 2"), "got: {detail}");
                assert!(detail.contains("missing traineddata"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn lease_returns_engine_on_drop() {
        let pool = counting_pool(2);
        assert_eq!(pool.available(), 2);

        let lease = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.in_use(), 1);

        drop(lease);
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn lease_gives_mutable_access() {
        let pool = counting_pool(1);
        {
            let mut lease = pool.acquire().await.unwrap();
            *lease += 40;
        }
        let lease = pool.acquire().await.unwrap();
        assert_eq!(*lease, 40);
    }

    #[tokio::test]
    async fn acquire_blocks_until_release() {
        let pool = Arc::new(counting_pool(1));
        let first = pool.acquire().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|lease| *lease) })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished(), "second acquire must wait");

        drop(first);
        let got = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter should finish after release")
            .unwrap()
            .unwrap();
        assert_eq!(got, 0);
    }

    #[tokio::test]
    async fn lease_is_returned_when_worker_panics() {
        let pool = Arc::new(counting_pool(1));
        let lease = pool.acquire().await.unwrap();

        let result = tokio::task::spawn_blocking(move || {
            let _lease = lease;
            panic!("recognition blew up");
        })
        .await;
        assert!(result.is_err());

        assert_eq!(pool.available(), 1);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn shutdown_waits_for_outstanding_leases() {
        let pool = Arc::new(counting_pool(2));
        let lease = pool.acquire().await.unwrap();

        let shutdown = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.shutdown().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!shutdown.is_finished(), "shutdown must wait for the lease");
        assert!(pool.is_closed());

        drop(lease);
        tokio::time::timeout(Duration::from_secs(2), shutdown)
            .await
            .expect("shutdown should complete after release")
            .unwrap();
        assert_eq!(pool.available(), 0);
    }

    #[tokio::test]
    async fn acquire_after_shutdown_fails() {
        let pool = counting_pool(2);
        pool.shutdown().await;
        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, ExtractError::PoolClosed));
    }

    #[tokio::test]
    async fn waiting_acquirers_fail_on_shutdown() {
        let pool = Arc::new(counting_pool(1));
        let lease = pool.acquire().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let shutdown = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.shutdown().await })
        };

        let waited = waiter.await.unwrap();
        assert!(matches!(waited, Err(ExtractError::PoolClosed)));

        drop(lease);
        shutdown.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let pool = counting_pool(3);
        pool.shutdown().await;
        pool.shutdown().await;
        assert!(pool.is_closed());
        assert_eq!(pool.available(), 0);
    }

    #[tokio::test]
    async fn engines_are_dropped_on_shutdown() {
        struct Tracked(Arc<AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicUsize::new(0));
        let pool = {
            let dropped = Arc::clone(&dropped);
            EnginePool::new(3, move |_| Ok(Tracked(Arc::clone(&dropped)))).unwrap()
        };
        assert_eq!(dropped.load(Ordering::SeqCst), 0);

        pool.shutdown().await;
        assert_eq!(dropped.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn bounded_shutdown_detaches_a_stuck_lease() {
        struct Tracked(Arc<AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicUsize::new(0));
        let pool = {
            let dropped = Arc::clone(&dropped);
            EnginePool::new(2, move |_| Ok(Tracked(Arc::clone(&dropped)))).unwrap()
        };
        let stuck = pool.acquire().await.unwrap();

        let clean = pool.shutdown_within(Duration::from_millis(50)).await;
        assert!(!clean);
        assert!(pool.is_closed());
        assert_eq!(dropped.load(Ordering::SeqCst), 1, "idle engine released");
        assert_eq!(pool.in_use(), 1);

        drop(stuck);
        assert_eq!(dropped.load(Ordering::SeqCst), 2, "late engine dropped on return");
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.in_use(), 0);
        assert!(matches!(pool.acquire().await, Err(ExtractError::PoolClosed)));
    }

    #[tokio::test]
    async fn bounded_shutdown_is_clean_when_nothing_is_out() {
        let pool = counting_pool(2);
        assert!(pool.shutdown_within(Duration::from_secs(1)).await);
        assert_eq!(pool.available(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn acquire_racing_shutdown_never_outlives_it() {
        for _ in 0..200 {
            let pool = Arc::new(counting_pool(1));
            let shut_down = Arc::new(AtomicBool::new(false));

            let acquirer = {
                let (pool, shut_down) = (Arc::clone(&pool), Arc::clone(&shut_down));
                tokio::spawn(async move {
                    match pool.acquire().await {
                        Ok(lease) => {
                            tokio::time::sleep(Duration::from_millis(1)).await;
                            assert!(
                                !shut_down.load(Ordering::SeqCst),
                                "shutdown finished while a lease was out"
                            );
                            drop(lease);
                        }
                        Err(err) => assert!(matches!(err, ExtractError::PoolClosed), "got: {err:?}"),
                    }
                })
            };
            let closer = {
                let (pool, shut_down) = (Arc::clone(&pool), Arc::clone(&shut_down));
                tokio::spawn(async move {
                    pool.shutdown().await;
                    shut_down.store(true, Ordering::SeqCst);
                })
            };

            acquirer.await.unwrap();
            closer.await.unwrap();
            assert_eq!(pool.in_use(), 0);
        }
    }
}
