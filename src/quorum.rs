//! Majority composition over N sub-factories, tolerating minority backend
//! failures.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Error;
use crate::lease::{Lease, LeaseFactory};
use crate::resource::LeaseResource;

fn majority_of(n: usize) -> usize {
    n / 2 + 1
}

/// Outcome of one release pass over the sub-leases. `Unknown` is an
/// internal "indeterminate" signal that never escapes this module.
enum ReleasePass {
    Majority,
    Unknown,
}

/// Composite lease over `N >= 1` sub-leases built from the same
/// `(resource, ttl)` on independent backends. Held iff strictly more than
/// `N / 2` of the sub-leases are Held.
pub struct QuorumLease {
    resource: LeaseResource,
    subs: Vec<Box<dyn Lease>>,
}

impl QuorumLease {
    async fn attempt_release(&mut self) -> ReleasePass {
        let majority = majority_of(self.subs.len());
        let mut successes = 0;
        for (i, sub) in self.subs.iter_mut().enumerate() {
            match sub.release().await {
                Ok(()) => successes += 1,
                Err(e) => log::debug!(
                    "quorum lease {}: sub-lease {i} failed to release: {e}",
                    self.resource
                ),
            }
        }
        if successes >= majority {
            ReleasePass::Majority
        } else {
            ReleasePass::Unknown
        }
    }
}

#[async_trait]
impl Lease for QuorumLease {
    /// Attempt each sub-lease in supplied order; exceptions count as
    /// failures. If fewer than a majority succeed, best-effort release the
    /// ones that did and fail. No state is published to callers in
    /// between, so a partial state is never observable from outside.
    async fn acquire(&mut self) -> Result<(), Error> {
        let majority = majority_of(self.subs.len());
        let mut acquired = Vec::new();

        for (i, sub) in self.subs.iter_mut().enumerate() {
            match sub.acquire().await {
                Ok(()) => acquired.push(i),
                Err(e) => log::debug!(
                    "quorum lease {}: sub-lease {i} failed to acquire: {e}",
                    self.resource
                ),
            }
        }

        if acquired.len() >= majority {
            return Ok(());
        }

        for i in acquired {
            if let Err(e) = self.subs[i].release().await {
                log::warn!(
                    "quorum lease {}: best-effort rollback of sub-lease {i} failed: {e}",
                    self.resource
                );
            }
        }

        Err(Error::acquire(
            self.resource.name(),
            format!("fewer than {majority}/{} sub-leases acquired", self.subs.len()),
        ))
    }

    /// Two-phase, bounded-retry release: one release pass; if it falls
    /// short of a majority, re-acquire every sub-lease to reach a known
    /// Held state (best-effort, a failed re-acquire leaves the composite
    /// indeterminate for one more pass) and try release once more. A
    /// second shortfall surfaces as [`Error::FailedToRelease`].
    async fn release(&mut self) -> Result<(), Error> {
        if let ReleasePass::Majority = self.attempt_release().await {
            return Ok(());
        }

        for (i, sub) in self.subs.iter_mut().enumerate() {
            if let Err(e) = sub.acquire().await {
                log::warn!(
                    "quorum lease {}: recovery re-acquire of sub-lease {i} failed: {e}",
                    self.resource
                );
            }
        }

        match self.attempt_release().await {
            ReleasePass::Majority => Ok(()),
            ReleasePass::Unknown => Err(Error::release(
                self.resource.name(),
                "release did not reach majority after one recovery retry",
            )),
        }
    }

    async fn status(&self) -> Result<bool, Error> {
        let majority = majority_of(self.subs.len());
        let mut held = 0;
        for sub in &self.subs {
            if sub.status().await.unwrap_or(false) {
                held += 1;
            }
        }
        Ok(held >= majority)
    }
}

/// Builds a [`QuorumLease`] over the sub-factories it was constructed
/// with, preserving their order.
pub struct QuorumLeaseFactory {
    factories: Vec<Box<dyn LeaseFactory>>,
}

impl QuorumLeaseFactory {
    pub fn new(factories: Vec<Box<dyn LeaseFactory>>) -> Self {
        Self { factories }
    }
}

#[async_trait]
impl LeaseFactory for QuorumLeaseFactory {
    async fn new_lease(&self, resource: LeaseResource, ttl: Duration) -> Box<dyn Lease> {
        let mut subs = Vec::with_capacity(self.factories.len());
        for factory in &self.factories {
            subs.push(factory.new_lease(resource.clone(), ttl).await);
        }
        Box::new(QuorumLease { resource, subs })
    }
}
