//! Lease backed by a unique-key insert into a collection named for the
//! resource, with a TTL index on the document's `date` field as a
//! crash-recovery backstop.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{doc, DateTime as BsonDateTime};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::error::Error;
use crate::lease::{Lease, LeaseFactory};
use crate::resource::LeaseResource;

const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Serialize, Deserialize, Debug)]
struct LockDocument {
    #[serde(rename = "_id")]
    id: String,
    date: BsonDateTime,
}

fn chrono_ttl(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero())
}

/// True once a document written at `written` has outlived `ttl` as of `now`.
fn is_stale(written: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    written + chrono_ttl(ttl) < now
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        &*err.kind,
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == DUPLICATE_KEY_CODE
    )
}

pub struct MongoLease {
    client: Client,
    db_name: String,
    clock: Arc<dyn Clock>,
    resource: LeaseResource,
    ttl: Duration,
}

impl MongoLease {
    fn collection(&self) -> Collection<LockDocument> {
        self.client
            .database(&self.db_name)
            .collection(self.resource.name())
    }

    async fn ensure_ttl_index(&self, coll: &Collection<LockDocument>) -> Result<(), Error> {
        let index = IndexModel::builder()
            .keys(doc! { "date": 1 })
            .options(
                IndexOptions::builder()
                    .expire_after(Some(self.ttl))
                    .build(),
            )
            .build();
        coll.create_index(index, None)
            .await
            .map_err(|e| Error::acquire(self.resource.name(), e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Lease for MongoLease {
    async fn acquire(&mut self) -> Result<(), Error> {
        let coll = self.collection();
        self.ensure_ttl_index(&coll).await?;

        let now = self.clock.now();
        let candidate = LockDocument {
            id: self.resource.name().to_string(),
            date: BsonDateTime::from_chrono(now),
        };

        match coll.insert_one(&candidate, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => {
                let existing = coll
                    .find_one(doc! { "_id": self.resource.name() }, None)
                    .await
                    .map_err(|e| Error::acquire(self.resource.name(), e.to_string()))?;

                let stale = existing
                    .as_ref()
                    .is_some_and(|doc| is_stale(doc.date.to_chrono(), self.ttl, now));

                if !stale {
                    return Err(Error::acquire(self.resource.name(), "document already held"));
                }

                coll.delete_one(doc! { "_id": self.resource.name() }, None)
                    .await
                    .map_err(|e| Error::acquire(self.resource.name(), e.to_string()))?;
                coll.insert_one(&candidate, None)
                    .await
                    .map_err(|e| Error::acquire(self.resource.name(), e.to_string()))?;
                Ok(())
            }
            Err(e) => Err(Error::acquire(self.resource.name(), e.to_string())),
        }
    }

    async fn release(&mut self) -> Result<(), Error> {
        let coll = self.collection();
        let deleted = coll
            .find_one_and_delete(doc! { "_id": self.resource.name() }, None)
            .await
            .map_err(|e| Error::release(self.resource.name(), e.to_string()))?;

        if deleted.is_some() {
            Ok(())
        } else {
            Err(Error::release(self.resource.name(), "document not found"))
        }
    }

    async fn status(&self) -> Result<bool, Error> {
        let coll = self.collection();
        let existing = coll
            .find_one(doc! { "_id": self.resource.name() }, None)
            .await
            .map_err(|e| Error::acquire(self.resource.name(), e.to_string()))?;

        let now = self.clock.now();
        Ok(existing.is_some_and(|doc| !is_stale(doc.date.to_chrono(), self.ttl, now)))
    }
}

/// Mints [`MongoLease`]s, one collection per resource, against a shared
/// `mongodb::Client` and database name.
pub struct MongoLeaseFactory {
    client: Client,
    db_name: String,
    clock: Arc<dyn Clock>,
}

impl MongoLeaseFactory {
    pub fn new(client: Client, db_name: impl Into<String>) -> Self {
        Self {
            client,
            db_name: db_name.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl LeaseFactory for MongoLeaseFactory {
    async fn new_lease(&self, resource: LeaseResource, ttl: Duration) -> Box<dyn Lease> {
        Box::new(MongoLease {
            client: self.client.clone(),
            db_name: self.db_name.clone(),
            clock: self.clock.clone(),
            resource,
            ttl,
        })
    }
}
