//! Pluggable distributed mutual-exclusion leases for scheduled tasks.
//!
//! A [`Lease`] is a time-bounded, non-blocking right to run one named
//! piece of work. Four backend families mint them: [`backends::redis`],
//! [`backends::zookeeper`], [`backends::mongo`], and [`backends::sql`].
//! [`QuorumLease`] composes any number of them into a single lease that
//! tolerates a minority of backend failures. [`schedule_guarded`] and
//! [`schedule_guarded_shared`] wrap a function so every invocation takes
//! a lease on its own name before running.

pub mod backends;
pub mod clock;
pub mod error;
pub mod guard;
pub mod lease;
pub mod quorum;
pub mod resource;
pub mod runtime;

pub use backends::mongo::{MongoLease, MongoLeaseFactory};
pub use backends::redis::{RedisLease, RedisLeaseFactory};
pub use backends::sql::{create_schema, drop_schema, SqlLease, SqlLeaseFactory};
pub use backends::zookeeper::{ZooKeeperLease, ZooKeeperLeaseFactory};
pub use clock::{Clock, FakeClock, SystemClock};
pub use error::Error;
pub use guard::{schedule_guarded, schedule_guarded_shared, TaskGuard};
pub use lease::{with_lease, Lease, LeaseFactory};
pub use quorum::{QuorumLease, QuorumLeaseFactory};
pub use resource::LeaseResource;
pub use runtime::{AmbientRuntime, TaskRuntime};
