//! Side-channel copy of the catalog that survives a restore.

use crate::catalog::Catalog;
use crate::error::BackupError;
use crate::models::backup::{BackupRecord, SnapshotEntry};
use std::path::{Path, PathBuf};

pub const SNAPSHOT_FILE_NAME: &str = "backup_list_temp.json";

/// Entries read back from a snapshot file.
#[derive(Debug, Clone, Default)]
pub struct SnapshotContents {
    pub entries: Vec<SnapshotEntry>,
    /// Entries that could not be parsed.
    pub malformed: usize,
}

#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(SNAPSHOT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the whole catalog to disk and returns the number of records.
    pub async fn capture(&self, catalog: &dyn Catalog) -> Result<usize, BackupError> {
        let records = catalog
            .list()
            .await
            .map_err(|e| BackupError::SnapshotWriteFailed(format!("listing catalog: {e}")))?;
        self.write(&records).await?;
        Ok(records.len())
    }

    /// Writes to a sibling temp file and renames it into place, so a crash
    /// never leaves a truncated snapshot behind.
    pub async fn write(&self, records: &[BackupRecord]) -> Result<(), BackupError> {
        let entries: Vec<SnapshotEntry> = records.iter().map(SnapshotEntry::from).collect();
        let json = serde_json::to_vec_pretty(&entries)
            .map_err(|e| BackupError::SnapshotWriteFailed(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        let write = async {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&tmp, &json).await?;
            tokio::fs::rename(&tmp, &self.path).await?;
            Ok::<(), std::io::Error>(())
        };
        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(BackupError::SnapshotWriteFailed(format!(
                "{}: {e}",
                self.path.display()
            )));
        }

        tracing::info!(path = %self.path.display(), records = entries.len(), "Backup list snapshot written");
        Ok(())
    }

    /// Loads the snapshot one entry at a time. Entries that do not describe a
    /// backup are logged and counted instead of failing the whole file.
    pub async fn read(&self) -> Result<SnapshotContents, BackupError> {
        let raw = tokio::fs::read(&self.path).await?;
        let values: Vec<serde_json::Value> = serde_json::from_slice(&raw).map_err(|e| {
            BackupError::RestoreFailed(format!(
                "snapshot {} is not a valid backup list: {e}",
                self.path.display()
            ))
        })?;

        let mut contents = SnapshotContents::default();
        for (index, value) in values.into_iter().enumerate() {
            match serde_json::from_value::<SnapshotEntry>(value) {
                Ok(entry) => contents.entries.push(entry),
                Err(e) => {
                    tracing::warn!(index, "Skipping malformed backup list entry: {e}");
                    contents.malformed += 1;
                }
            }
        }
        Ok(contents)
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Best effort; failures are logged only.
    pub async fn remove(&self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Backup list snapshot removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), "Failed to remove backup list snapshot: {e}"),
        }
    }
}
