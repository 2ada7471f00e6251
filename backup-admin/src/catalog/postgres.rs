use crate::catalog::Catalog;
use crate::db::Database;
use crate::error::BackupError;
use crate::models::backup::{BackupRecord, MetadataPatch, NewBackup};
use async_trait::async_trait;
use std::sync::Arc;

/// Catalog stored in the `backups` table of the live database.
///
/// Takes the current pool from [`Database`] on every call so that it follows
/// the pool across a reconnect.
pub struct PgCatalog {
    db: Arc<Database>,
}

impl PgCatalog {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn insert(&self, backup: NewBackup) -> Result<BackupRecord, BackupError> {
        let pool = self.db.pool().await;
        let record = sqlx::query_as::<_, BackupRecord>(
            "INSERT INTO backups (filename, description, size, type, status, url, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, now()), COALESCE($8, now()))
             RETURNING *",
        )
        .bind(&backup.filename)
        .bind(&backup.description)
        .bind(backup.size)
        .bind(&backup.backup_type)
        .bind(backup.status.as_str())
        .bind(&backup.url)
        .bind(backup.created_at)
        .bind(backup.updated_at)
        .fetch_one(&pool)
        .await?;
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<BackupRecord>, BackupError> {
        let pool = self.db.pool().await;
        let records = sqlx::query_as::<_, BackupRecord>(
            "SELECT * FROM backups ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&pool)
        .await?;
        Ok(records)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<BackupRecord>, BackupError> {
        let pool = self.db.pool().await;
        let record = sqlx::query_as::<_, BackupRecord>("SELECT * FROM backups WHERE id = $1")
            .bind(id)
            .fetch_optional(&pool)
            .await?;
        Ok(record)
    }

    async fn find_by_filename(&self, filename: &str) -> Result<Option<BackupRecord>, BackupError> {
        let pool = self.db.pool().await;
        let record =
            sqlx::query_as::<_, BackupRecord>("SELECT * FROM backups WHERE filename = $1")
                .bind(filename)
                .fetch_optional(&pool)
                .await?;
        Ok(record)
    }

    async fn patch_metadata(
        &self,
        id: i64,
        patch: &MetadataPatch,
    ) -> Result<BackupRecord, BackupError> {
        let pool = self.db.pool().await;
        sqlx::query_as::<_, BackupRecord>(
            "UPDATE backups SET size = $2, url = $3, status = $4, updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(patch.size)
        .bind(&patch.url)
        .bind(patch.status.as_str())
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| BackupError::NotFound(format!("Backup with ID {id} not found")))
    }

    async fn delete(&self, id: i64) -> Result<bool, BackupError> {
        let pool = self.db.pool().await;
        let result = sqlx::query("DELETE FROM backups WHERE id = $1")
            .bind(id)
            .execute(&pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn table_exists(&self) -> Result<bool, BackupError> {
        let pool = self.db.pool().await;
        let exists = sqlx::query_scalar::<_, bool>("SELECT to_regclass('backups') IS NOT NULL")
            .fetch_one(&pool)
            .await?;
        Ok(exists)
    }
}
