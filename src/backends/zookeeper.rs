//! Lease backed by a ZooKeeper znode at `/tasks/<resource>` whose payload
//! is the timestamp at which the current lease expires, or empty.
//! Requires loosely synchronised clocks across acquirers, since expiry is
//! compared against local wall-clock time.

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use zookeeper_async::{Acl, CreateMode, ZkError, ZooKeeper};

use crate::clock::{Clock, SystemClock};
use crate::error::Error;
use crate::lease::{Lease, LeaseFactory};
use crate::resource::LeaseResource;

const TASKS_ROOT: &str = "/tasks";
const TIME_FMT: &str = "%Y-%m-%dT%H:%M:%S";

fn path_for(resource: &LeaseResource) -> String {
    format!("{TASKS_ROOT}/{}", resource.name())
}

fn parse_expiry(data: &[u8]) -> Option<chrono::DateTime<Utc>> {
    if data.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(data);
    NaiveDateTime::parse_from_str(&text, TIME_FMT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// The expiry to write on acquire, or `None` if `current` is still live
/// and acquisition must be refused.
fn next_expiry(
    current: Option<chrono::DateTime<Utc>>,
    now: chrono::DateTime<Utc>,
    ttl: Duration,
) -> Option<chrono::DateTime<Utc>> {
    if current.is_some_and(|expiry| expiry > now) {
        None
    } else {
        Some(now + chrono::Duration::seconds(ttl.as_secs() as i64))
    }
}

/// Whether a release is allowed to delete the znode: only while the
/// payload still decodes to the expiry this lease itself wrote, and that
/// expiry has not yet lapsed.
fn release_is_permitted(
    current: Option<chrono::DateTime<Utc>>,
    ours: Option<chrono::DateTime<Utc>>,
    now: chrono::DateTime<Utc>,
) -> bool {
    matches!(
        (current, ours),
        (Some(current), Some(ours)) if current == ours && current > now
    )
}

pub struct ZooKeeperLease {
    zk: Arc<ZooKeeper>,
    clock: Arc<dyn Clock>,
    resource: LeaseResource,
    ttl: Duration,
    path: String,
    held: bool,
    expiry: Option<chrono::DateTime<Utc>>,
}

impl ZooKeeperLease {
    fn new(
        zk: Arc<ZooKeeper>,
        clock: Arc<dyn Clock>,
        resource: LeaseResource,
        ttl: Duration,
    ) -> Self {
        let path = path_for(&resource);
        Self {
            zk,
            clock,
            resource,
            ttl,
            path,
            held: false,
            expiry: None,
        }
    }
}

#[async_trait]
impl Lease for ZooKeeperLease {
    /// Ensure the path exists, read its payload, and fail if it decodes to
    /// a still-future expiry. Otherwise overwrite it with `now + ttl`,
    /// using the znode's version as a CAS guard so two concurrent
    /// acquirers cannot both succeed.
    async fn acquire(&mut self) -> Result<(), Error> {
        let now = self.clock.now();

        if self
            .zk
            .exists(&self.path, false)
            .await
            .map_err(|e| Error::acquire(self.resource.name(), e.to_string()))?
            .is_none()
        {
            match self
                .zk
                .create(
                    &self.path,
                    Vec::new(),
                    Acl::open_unsafe().clone(),
                    CreateMode::Persistent,
                )
                .await
            {
                Ok(_) | Err(ZkError::NodeExists) => {}
                Err(e) => return Err(Error::acquire(self.resource.name(), e.to_string())),
            }
        }

        let (data, stat) = self
            .zk
            .get_data(&self.path, false)
            .await
            .map_err(|e| Error::acquire(self.resource.name(), e.to_string()))?;

        let expiry = next_expiry(parse_expiry(&data), now, self.ttl).ok_or_else(|| {
            Error::acquire(self.resource.name(), "lease held by another acquirer")
        })?;
        let payload = expiry.format(TIME_FMT).to_string().into_bytes();

        self.zk
            .set_data(&self.path, payload, Some(stat.version))
            .await
            .map_err(|_| Error::acquire(self.resource.name(), "version conflict on acquire"))?;

        self.held = true;
        self.expiry = Some(expiry);
        Ok(())
    }

    /// Deletes the znode only if its payload still decodes to the expiry
    /// this lease itself wrote, and that expiry is still in the future.
    /// ZooKeeper has no TTL mechanism of its own: nothing deletes a znode
    /// when its encoded expiry lapses, so without this re-check a holder
    /// whose lease has already expired could call `release` and delete a
    /// znode a second acquirer has since legitimately rewritten.
    async fn release(&mut self) -> Result<(), Error> {
        if !self.held {
            return Err(Error::release(self.resource.name(), "lease not held"));
        }

        let now = self.clock.now();
        let current_expiry = match self.zk.get_data(&self.path, false).await {
            Ok((data, _)) => parse_expiry(&data),
            Err(_) => None,
        };

        if !release_is_permitted(current_expiry, self.expiry, now) {
            self.held = false;
            self.expiry = None;
            return Err(Error::release(
                self.resource.name(),
                "lease already expired or reacquired by another holder",
            ));
        }

        self.zk
            .delete(&self.path, None)
            .await
            .map_err(|e| Error::release(self.resource.name(), e.to_string()))?;
        self.held = false;
        self.expiry = None;
        Ok(())
    }

    async fn status(&self) -> Result<bool, Error> {
        let data = match self.zk.get_data(&self.path, false).await {
            Ok((data, _)) => data,
            Err(_) => return Ok(false),
        };
        Ok(parse_expiry(&data).is_some_and(|expiry| expiry > self.clock.now()))
    }
}

/// Mints [`ZooKeeperLease`]s against a shared session, ensuring the
/// `/tasks` ancestor path exists once per factory.
pub struct ZooKeeperLeaseFactory {
    zk: Arc<ZooKeeper>,
    clock: Arc<dyn Clock>,
    root_ensured: tokio::sync::OnceCell<()>,
}

impl ZooKeeperLeaseFactory {
    pub fn new(zk: Arc<ZooKeeper>) -> Self {
        Self {
            zk,
            clock: Arc::new(SystemClock),
            root_ensured: tokio::sync::OnceCell::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn ensure_root(&self) -> Result<(), Error> {
        self.root_ensured
            .get_or_try_init(|| async {
                if self
                    .zk
                    .exists(TASKS_ROOT, false)
                    .await
                    .map_err(|e| Error::acquire(TASKS_ROOT, e.to_string()))?
                    .is_some()
                {
                    return Ok(());
                }
                match self
                    .zk
                    .create(
                        TASKS_ROOT,
                        Vec::new(),
                        Acl::open_unsafe().clone(),
                        CreateMode::Persistent,
                    )
                    .await
                {
                    Ok(_) | Err(ZkError::NodeExists) => Ok(()),
                    Err(e) => Err(Error::acquire(TASKS_ROOT, e.to_string())),
                }
            })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl LeaseFactory for ZooKeeperLeaseFactory {
    async fn new_lease(&self, resource: LeaseResource, ttl: Duration) -> Box<dyn Lease> {
        if let Err(e) = self.ensure_root().await {
            log::warn!("zookeeper lease factory: failed to ensure {TASKS_ROOT}: {e}");
        }
        Box::new(ZooKeeperLease::new(
            self.zk.clone(),
            self.clock.clone(),
            resource,
            ttl,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, FakeClock};

    #[test]
    fn empty_payload_decodes_to_no_expiry() {
        assert!(parse_expiry(b"").is_none());
    }

    #[test]
    fn payload_roundtrips_through_the_wire_format() {
        let now = Utc.with_ymd_and_hms(2026, 7, 30, 12, 0, 0).unwrap();
        let payload = now.format(TIME_FMT).to_string();
        let parsed = parse_expiry(payload.as_bytes()).unwrap();
        assert_eq!(parsed, now);
    }

    #[test]
    fn next_expiry_refuses_a_still_live_znode_then_reclaims_after_ttl() {
        let clock = FakeClock::new(Utc::now());
        let ttl = Duration::from_secs(1);

        let written = next_expiry(None, clock.now(), ttl).unwrap();

        assert!(next_expiry(Some(written), clock.now(), ttl).is_none());

        clock.advance(chrono::Duration::milliseconds(999));
        assert!(next_expiry(Some(written), clock.now(), ttl).is_none());

        clock.advance(chrono::Duration::milliseconds(2));
        assert!(next_expiry(Some(written), clock.now(), ttl).is_some());
    }

    #[test]
    fn release_is_permitted_only_while_our_own_expiry_is_still_current_and_live() {
        let clock = FakeClock::new(Utc::now());
        let ours = clock.now() + chrono::Duration::seconds(1);

        // nobody has rewritten the znode, and it hasn't lapsed yet
        assert!(release_is_permitted(Some(ours), Some(ours), clock.now()));

        // a second acquirer rewrote the znode with a different expiry
        let theirs = ours + chrono::Duration::seconds(1);
        assert!(!release_is_permitted(Some(theirs), Some(ours), clock.now()));

        // nobody rewrote it, but our own expiry has lapsed
        clock.advance(chrono::Duration::seconds(2));
        assert!(!release_is_permitted(Some(ours), Some(ours), clock.now()));
    }
}

/// Requires a live ZooKeeper reachable at `ZOOKEEPER_HOSTS` (defaults to
/// `zookeeper:2181`). Not run by default: `cargo test -- --ignored`.
#[cfg(test)]
mod integration {
    use super::*;
    use rand::Rng;
    use std::sync::Once;
    use std::time::Duration as StdDuration;
    use test_context::{test_context, AsyncTestContext};

    static LOG_INIT: Once = Once::new();

    struct NoopWatcher;
    impl zookeeper_async::Watcher for NoopWatcher {
        fn handle(&self, event: zookeeper_async::WatchedEvent) {
            log::debug!("zookeeper watch event: {event:?}");
        }
    }

    fn zk_hosts() -> String {
        std::env::var("ZOOKEEPER_HOSTS").unwrap_or_else(|_| "zookeeper:2181".to_string())
    }

    struct TestContext {
        zk: Arc<ZooKeeper>,
        factory: ZooKeeperLeaseFactory,
        resource: LeaseResource,
    }

    #[async_trait::async_trait]
    impl AsyncTestContext for TestContext {
        async fn setup() -> Self {
            LOG_INIT.call_once(env_logger::init);
            let zk = Arc::new(
                ZooKeeper::connect(&zk_hosts(), StdDuration::from_secs(10), NoopWatcher)
                    .await
                    .unwrap(),
            );
            let resource =
                LeaseResource::new(format!("test-{}", rand::thread_rng().gen::<u32>())).unwrap();
            Self {
                factory: ZooKeeperLeaseFactory::new(zk.clone()),
                zk,
                resource,
            }
        }

        async fn teardown(self) {
            let _ = self.zk.delete(&path_for(&self.resource), None).await;
        }
    }

    #[test_context(TestContext)]
    #[tokio::test]
    #[ignore]
    async fn refuses_second_acquire_then_reclaims_after_ttl(ctx: &mut TestContext) {
        let ttl = Duration::from_secs(1);

        let mut a = ctx.factory.new_lease(ctx.resource.clone(), ttl).await;
        let mut b = ctx.factory.new_lease(ctx.resource.clone(), ttl).await;

        a.acquire().await.unwrap();
        assert!(b.acquire().await.is_err());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        b.acquire().await.unwrap();
        b.release().await.unwrap();
    }
}
