use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

/// Injectable time source.
///
/// The ZooKeeper and SQL backends bake wall-clock comparisons into their
/// payload/row; hiding `Utc::now()` behind this trait is what makes
/// TTL-reclaim and status-consistency testable without sleeping for real
/// TTL windows.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Default clock backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Used in tests to exercise TTL expiry deterministically: acquire, assert
/// held, `advance(ttl)`, assert expired. No `sleep` required.
#[derive(Clone)]
pub struct FakeClock {
    inner: Arc<Mutex<DateTime<Utc>>>,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.inner.lock().unwrap();
        *guard += delta;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.lock().unwrap()
    }
}
