//! Lease backed by Redis `SET key value NX PX=ttl_ms`, released with a
//! token compare-and-delete.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

use crate::error::Error;
use crate::lease::{Lease, LeaseFactory};
use crate::resource::LeaseResource;

/// Compare-and-delete: only removes the key if it still holds our token.
/// A plain `DEL` would be unsafe: a late release could delete a different
/// holder's lease once the original has expired and someone else has
/// acquired it.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// `floor(total_microseconds / 1000)`, clamped to a minimum of 1ms so a
/// sub-millisecond TTL still expires rather than never.
fn ttl_millis(ttl: Duration) -> usize {
    ((ttl.as_micros() / 1000) as usize).max(1)
}

pub struct RedisLease {
    client: redis::Client,
    resource: LeaseResource,
    ttl: Duration,
    token: Option<String>,
}

impl RedisLease {
    fn new(client: redis::Client, resource: LeaseResource, ttl: Duration) -> Self {
        Self {
            client,
            resource,
            ttl,
            token: None,
        }
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }
}

#[async_trait]
impl Lease for RedisLease {
    async fn acquire(&mut self) -> Result<(), Error> {
        let token = uuid::Uuid::new_v4().to_string();
        let mut conn = self
            .conn()
            .await
            .map_err(|e| Error::acquire(self.resource.name(), e.to_string()))?;
        let ttl_ms = ttl_millis(self.ttl);

        let set: Option<String> = redis::cmd("SET")
            .arg(self.resource.name())
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::acquire(self.resource.name(), e.to_string()))?;

        match set {
            Some(_) => {
                self.token = Some(token);
                Ok(())
            }
            None => Err(Error::acquire(self.resource.name(), "key already held")),
        }
    }

    async fn release(&mut self) -> Result<(), Error> {
        let Some(token) = self.token.clone() else {
            return Err(Error::release(self.resource.name(), "lease not held"));
        };

        let mut conn = self
            .conn()
            .await
            .map_err(|e| Error::release(self.resource.name(), e.to_string()))?;

        let deleted: i32 = redis::Script::new(RELEASE_SCRIPT)
            .key(self.resource.name())
            .arg(&token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::release(self.resource.name(), e.to_string()))?;

        if deleted == 1 {
            self.token = None;
            Ok(())
        } else {
            Err(Error::release(
                self.resource.name(),
                "CAS delete found a different or absent holder",
            ))
        }
    }

    async fn status(&self) -> Result<bool, Error> {
        let Some(token) = &self.token else {
            return Ok(false);
        };
        let mut conn = self
            .conn()
            .await
            .map_err(|e| Error::acquire(self.resource.name(), e.to_string()))?;
        let current: Option<String> = conn
            .get(self.resource.name())
            .await
            .map_err(|e| Error::acquire(self.resource.name(), e.to_string()))?;
        Ok(current.as_deref() == Some(token.as_str()))
    }
}

/// Mints [`RedisLease`]s against a shared, already-connected `redis::Client`.
pub struct RedisLeaseFactory {
    client: redis::Client,
}

impl RedisLeaseFactory {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LeaseFactory for RedisLeaseFactory {
    async fn new_lease(&self, resource: LeaseResource, ttl: Duration) -> Box<dyn Lease> {
        Box::new(RedisLease::new(self.client.clone(), resource, ttl))
    }
}
