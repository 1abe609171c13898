//! Scheduling wrapper that turns a function into a lease-guarded task.
//! The task-queue runtime that ultimately executes the function is
//! treated as an opaque sink; this crate does not dispatch work itself.

use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::Error;
use crate::lease::{Lease, LeaseFactory};
use crate::resource::LeaseResource;
use crate::runtime::{AmbientRuntime, TaskRuntime};

/// A function wrapped so that each invocation first acquires a lease
/// bound to `LeaseResource(name)`; on contention the call is refused with
/// [`Error::TaskIsLocked`] instead of being handed to the runtime.
///
/// The lease is minted once, at wrap time, and its identity is fixed for
/// the guard's lifetime: `TaskGuard` is not safe for overlapping
/// invocations from the same process and relies on its task runtime
/// calling it one invocation at a time.
///
/// Deliberately does **not** release on completion; release is left to
/// the TTL. Two invocations co-scheduled within the same TTL window must
/// both observe the resource Held, even though the first has already
/// finished.
pub struct TaskGuard<F, Runtime> {
    name: String,
    ttl: Duration,
    lease: Mutex<Box<dyn Lease>>,
    func: F,
    runtime: Runtime,
}

impl<F, Runtime, Fut> TaskGuard<F, Runtime>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future + Send,
    Runtime: TaskRuntime<Fut>,
{
    /// Attempt the lease, and on success hand the wrapped function to the
    /// runtime. On contention, returns [`Error::TaskIsLocked`] carrying
    /// the TTL so the caller can choose a retry horizon.
    pub async fn invoke(&self) -> Result<Runtime::Output, Error> {
        {
            let mut lease = self.lease.lock().await;
            lease.acquire().await.map_err(|e| Error::TaskIsLocked {
                function: self.name.clone(),
                ttl: self.ttl,
                message: e.to_string(),
            })?;
        }
        log::info!("successfully locked {} for invocation", self.name);
        Ok(self.runtime.submit((self.func)()))
    }
}

/// Wrap `func` behind a lease-guarded task bound to a specific
/// [`TaskRuntime`].
pub async fn schedule_guarded<F, Runtime, Fut>(
    name: impl Into<String>,
    ttl: Duration,
    factory: &dyn LeaseFactory,
    func: F,
    runtime: Runtime,
) -> Result<TaskGuard<F, Runtime>, Error>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future + Send,
    Runtime: TaskRuntime<Fut>,
{
    let name = name.into();
    let resource = LeaseResource::new(name.clone())?;
    let lease = factory.new_lease(resource, ttl).await;
    Ok(TaskGuard {
        name,
        ttl,
        lease: Mutex::new(lease),
        func,
        runtime,
    })
}

/// Wrap `func` behind a lease-guarded task bound to the ambient runtime
/// ([`AmbientRuntime`]). Locking semantics are identical to
/// [`schedule_guarded`].
pub async fn schedule_guarded_shared<F, Fut>(
    name: impl Into<String>,
    ttl: Duration,
    factory: &dyn LeaseFactory,
    func: F,
) -> Result<TaskGuard<F, AmbientRuntime>, Error>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future + Send,
{
    schedule_guarded(name, ttl, factory, func, AmbientRuntime).await
}
