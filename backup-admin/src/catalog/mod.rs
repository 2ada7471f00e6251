//! Persistent store of backup records.

pub mod postgres;

use crate::error::BackupError;
use crate::models::backup::{BackupRecord, MetadataPatch, NewBackup};
use async_trait::async_trait;

pub use postgres::PgCatalog;

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn insert(&self, backup: NewBackup) -> Result<BackupRecord, BackupError>;

    /// Newest first.
    async fn list(&self) -> Result<Vec<BackupRecord>, BackupError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<BackupRecord>, BackupError>;

    async fn find_by_filename(&self, filename: &str) -> Result<Option<BackupRecord>, BackupError>;

    async fn patch_metadata(
        &self,
        id: i64,
        patch: &MetadataPatch,
    ) -> Result<BackupRecord, BackupError>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: i64) -> Result<bool, BackupError>;

    /// Whether the backing table exists at all. False right after a restore
    /// whose migrations did not recreate it.
    async fn table_exists(&self) -> Result<bool, BackupError>;
}

pub async fn get_by_id(catalog: &dyn Catalog, id: i64) -> Result<BackupRecord, BackupError> {
    catalog
        .find_by_id(id)
        .await?
        .ok_or_else(|| BackupError::NotFound(format!("Backup with ID {id} not found")))
}
