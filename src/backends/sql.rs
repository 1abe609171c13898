//! Lease backed by a unique-constraint row in a `resources` table, swept
//! of expired rows on every acquire. Targets SQLite via `sqlx`; the
//! sweep-then-insert transaction generalizes to any `sqlx` backend with a
//! unique-column constraint.

use async_trait::async_trait;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::error::Error;
use crate::lease::{Lease, LeaseFactory};
use crate::resource::LeaseResource;

/// Create the `resources` table. Exposed explicitly, for tests and
/// operators rather than the hot acquire/release path.
pub async fn create_schema(pool: &Pool<Sqlite>) -> Result<(), Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            resource_name TEXT UNIQUE NOT NULL,
            expire_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| Error::acquire("resources", e.to_string()))?;
    Ok(())
}

/// Drop the `resources` table. Exposed explicitly alongside
/// [`create_schema`].
pub async fn drop_schema(pool: &Pool<Sqlite>) -> Result<(), Error> {
    sqlx::query("DROP TABLE IF EXISTS resources")
        .execute(pool)
        .await
        .map_err(|e| Error::release("resources", e.to_string()))?;
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub struct SqlLease {
    pool: Pool<Sqlite>,
    clock: Arc<dyn Clock>,
    resource: LeaseResource,
    ttl: Duration,
}

#[async_trait]
impl Lease for SqlLease {
    /// One transaction: delete expired rows, then insert. A unique-
    /// constraint violation on the insert means the resource is still
    /// held; without the sweep a crashed holder's row would wedge the
    /// resource until a DBA intervenes.
    async fn acquire(&mut self) -> Result<(), Error> {
        let now = self.clock.now();
        let expire_at = now + chrono::Duration::from_std(self.ttl).unwrap_or_default();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::acquire(self.resource.name(), e.to_string()))?;

        sqlx::query("DELETE FROM resources WHERE expire_at < ?")
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::acquire(self.resource.name(), e.to_string()))?;

        let insert = sqlx::query("INSERT INTO resources (resource_name, expire_at) VALUES (?, ?)")
            .bind(self.resource.name())
            .bind(expire_at)
            .execute(&mut *tx)
            .await;

        match insert {
            Ok(_) => {
                tx.commit()
                    .await
                    .map_err(|e| Error::acquire(self.resource.name(), e.to_string()))?;
                Ok(())
            }
            Err(e) => {
                let _ = tx.rollback().await;
                if is_unique_violation(&e) {
                    Err(Error::acquire(self.resource.name(), "resource already held"))
                } else {
                    Err(Error::acquire(self.resource.name(), e.to_string()))
                }
            }
        }
    }

    async fn release(&mut self) -> Result<(), Error> {
        let result = sqlx::query("DELETE FROM resources WHERE resource_name = ?")
            .bind(self.resource.name())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::release(self.resource.name(), e.to_string()))?;

        if result.rows_affected() > 0 {
            Ok(())
        } else {
            Err(Error::release(self.resource.name(), "no matching row"))
        }
    }

    async fn status(&self) -> Result<bool, Error> {
        let now = self.clock.now();
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM resources WHERE resource_name = ? AND expire_at >= ?")
                .bind(self.resource.name())
                .bind(now)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::acquire(self.resource.name(), e.to_string()))?;

        Ok(row.is_some())
    }
}

/// Mints [`SqlLease`]s against a shared connection pool.
pub struct SqlLeaseFactory {
    pool: Pool<Sqlite>,
    clock: Arc<dyn Clock>,
}

impl SqlLeaseFactory {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl LeaseFactory for SqlLeaseFactory {
    async fn new_lease(&self, resource: LeaseResource, ttl: Duration) -> Box<dyn Lease> {
        Box::new(SqlLease {
            pool: self.pool.clone(),
            clock: self.clock.clone(),
            resource,
            ttl,
        })
    }
}
