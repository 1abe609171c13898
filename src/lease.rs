use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::error::Error;
use crate::resource::LeaseResource;

/// A time-bounded right to enter a named critical section on one backend.
///
/// A `Lease` is minted by a [`LeaseFactory`] for a fixed `(resource, ttl)`
/// pair. It moves `Unheld -> Held` on a successful [`Lease::acquire`],
/// `Held -> Released` on a successful [`Lease::release`], and may move
/// `Held -> Expired` silently once wall-clock time exceeds the TTL. A
/// `Lease` is not safe for concurrent use by multiple callers. One handle
/// corresponds to one logical holder.
#[async_trait]
pub trait Lease: Send + Sync {
    /// Attempt to take the lease. Non-blocking: on contention or any
    /// uncertain outcome this returns [`Error::FailedToAcquire`]
    /// immediately rather than waiting for the holder to release.
    async fn acquire(&mut self) -> Result<(), Error>;

    /// Relinquish a held lease. Not idempotent: releasing a lease that is
    /// not currently held (unheld, already released, or expired) fails
    /// with [`Error::FailedToRelease`].
    async fn release(&mut self) -> Result<(), Error>;

    /// True iff the lease is held right now and has not expired. Cheap and
    /// side-effect free save for the one backend round-trip it may need.
    async fn status(&self) -> Result<bool, Error>;
}

/// Mints a [`Lease`] for a given resource and TTL.
///
/// Factories are cheap, stateless beyond a reference to an already
/// connected backend client, and may be shared by any number of
/// concurrent callers. Lease handles minted by different factories are
/// independent: contention is per backend until composed under
/// [`crate::quorum::QuorumLease`].
#[async_trait]
pub trait LeaseFactory: Send + Sync {
    async fn new_lease(&self, resource: LeaseResource, ttl: Duration) -> Box<dyn Lease>;
}

/// Run `body` under a scoped acquisition of `lease`.
///
/// Acquire on entry; release on every exit path, including when `body`
/// itself returns an error. Unlike a `Drop`-based guard, a release failure
/// here is returned to the caller rather than logged and swallowed. A
/// release can fail in a way that matters to the caller, and nothing
/// downstream of this call can surface it otherwise.
pub async fn with_lease<T, F, Fut>(lease: &mut dyn Lease, body: F) -> Result<T, Error>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    lease.acquire().await?;
    let body_result = body().await;
    let release_result = lease.release().await;
    match (body_result, release_result) {
        (Ok(value), Ok(())) => Ok(value),
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(e),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// An in-process `Lease` double used across this crate's unit tests —
    /// stands in for a backend so quorum/guard logic can be exercised
    /// without a live Redis/ZooKeeper/Mongo/SQL server.
    pub struct MemoryLease {
        held: Arc<AtomicBool>,
        fail_acquire: Arc<AtomicBool>,
        fail_release: Arc<AtomicBool>,
    }

    impl MemoryLease {
        pub fn new() -> (Self, MemoryLeaseHandle) {
            let held = Arc::new(AtomicBool::new(false));
            let fail_acquire = Arc::new(AtomicBool::new(false));
            let fail_release = Arc::new(AtomicBool::new(false));
            (
                Self {
                    held: held.clone(),
                    fail_acquire: fail_acquire.clone(),
                    fail_release: fail_release.clone(),
                },
                MemoryLeaseHandle {
                    held,
                    fail_acquire,
                    fail_release,
                },
            )
        }

        /// A second handle onto the same underlying state, so several
        /// `MemoryLease`s can contend over one resource the way several
        /// independently-constructed backend leases would.
        pub fn from_handle(handle: &MemoryLeaseHandle) -> Self {
            Self {
                held: handle.held.clone(),
                fail_acquire: handle.fail_acquire.clone(),
                fail_release: handle.fail_release.clone(),
            }
        }
    }

    /// External handle used by a test to observe/manipulate a
    /// [`MemoryLease`] "out of band" (mirrors the original test suite's
    /// `lock.locks[0].release()` pokes at a quorum sub-lease).
    #[derive(Clone)]
    pub struct MemoryLeaseHandle {
        held: Arc<AtomicBool>,
        fail_acquire: Arc<AtomicBool>,
        fail_release: Arc<AtomicBool>,
    }

    impl MemoryLeaseHandle {
        pub fn release_out_of_band(&self) {
            self.held.store(false, Ordering::SeqCst);
        }

        pub fn set_fail_acquire(&self, fail: bool) {
            self.fail_acquire.store(fail, Ordering::SeqCst);
        }

        pub fn set_fail_release(&self, fail: bool) {
            self.fail_release.store(fail, Ordering::SeqCst);
        }

        pub fn is_held(&self) -> bool {
            self.held.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Lease for MemoryLease {
        async fn acquire(&mut self) -> Result<(), Error> {
            if self.fail_acquire.load(Ordering::SeqCst) {
                return Err(Error::acquire("memory", "forced failure"));
            }
            if self.held.swap(true, Ordering::SeqCst) {
                return Err(Error::acquire("memory", "already held"));
            }
            Ok(())
        }

        async fn release(&mut self) -> Result<(), Error> {
            if self.fail_release.load(Ordering::SeqCst) {
                return Err(Error::release("memory", "forced failure"));
            }
            if self.held.swap(false, Ordering::SeqCst) {
                Ok(())
            } else {
                Err(Error::release("memory", "not held"))
            }
        }

        async fn status(&self) -> Result<bool, Error> {
            Ok(self.held.load(Ordering::SeqCst))
        }
    }

    pub struct MemoryLeaseFactory {
        pub handles: std::sync::Mutex<Vec<MemoryLeaseHandle>>,
    }

    impl MemoryLeaseFactory {
        pub fn new() -> Self {
            Self {
                handles: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LeaseFactory for MemoryLeaseFactory {
        async fn new_lease(&self, _resource: LeaseResource, _ttl: Duration) -> Box<dyn Lease> {
            let (lease, handle) = MemoryLease::new();
            self.handles.lock().unwrap().push(handle);
            Box::new(lease)
        }
    }

    #[tokio::test]
    async fn scoped_acquisition_releases_on_success_and_failure() {
        let (mut lease, handle) = MemoryLease::new();

        let ok: Result<i32, Error> = with_lease(&mut lease, || async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
        assert!(!handle.is_held());

        let err: Result<i32, Error> = with_lease(&mut lease, || async {
            Err(Error::acquire("memory", "body failed"))
        })
        .await;
        assert!(err.is_err());
        assert!(!handle.is_held());
    }

    #[tokio::test]
    async fn release_on_unheld_lease_fails() {
        let (mut lease, _handle) = MemoryLease::new();
        assert!(lease.release().await.is_err());
    }
}
