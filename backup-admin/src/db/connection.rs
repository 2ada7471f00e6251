use crate::error::BackupError;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tokio::sync::RwLock;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// The application's handle on the live database, as seen by a restore.
///
/// A restore drops the database out from under the pool, so the pool has to
/// be torn down beforehand and rebuilt afterwards.
#[async_trait]
pub trait LiveConnection: Send + Sync {
    /// Closes every pooled connection. Idempotent.
    async fn disconnect(&self);

    /// Replaces the pool with a fresh one.
    async fn connect(&self) -> Result<(), BackupError>;

    /// Round-trips a trivial query.
    async fn probe(&self) -> Result<(), BackupError>;
}

/// Owned, swappable Postgres pool.
///
/// Callers take a clone of the current pool per operation through
/// [`Database::pool`]; a clone taken before a reconnect fails with
/// `PoolClosed` rather than talking to a dropped database.
pub struct Database {
    url: String,
    max_connections: u32,
    pool: RwLock<PgPool>,
}

impl Database {
    /// Builds the pool without opening a connection.
    pub fn connect_lazy(url: &str, max_connections: u32) -> Result<Self, BackupError> {
        let pool = build_pool(url, max_connections)?;
        Ok(Self {
            url: url.to_string(),
            max_connections,
            pool: RwLock::new(pool),
        })
    }

    pub async fn pool(&self) -> PgPool {
        self.pool.read().await.clone()
    }

    pub async fn close(&self) {
        self.pool.read().await.close().await;
    }
}

fn build_pool(url: &str, max_connections: u32) -> Result<PgPool, BackupError> {
    Ok(PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_lazy(url)?)
}

#[async_trait]
impl LiveConnection for Database {
    async fn disconnect(&self) {
        let pool = self.pool().await;
        if !pool.is_closed() {
            tracing::info!("Closing database connection pool");
            pool.close().await;
        }
    }

    async fn connect(&self) -> Result<(), BackupError> {
        let fresh = build_pool(&self.url, self.max_connections)?;
        let previous = std::mem::replace(&mut *self.pool.write().await, fresh);
        previous.close().await;
        tracing::info!("Database connection pool re-created");
        Ok(())
    }

    async fn probe(&self) -> Result<(), BackupError> {
        let pool = self.pool().await;
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&pool)
            .await?;
        Ok(())
    }
}
