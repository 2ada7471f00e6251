//! Replays a catalog snapshot into a freshly restored database.

use crate::catalog::Catalog;
use crate::db::LiveConnection;
use crate::error::BackupError;
use crate::models::backup::SnapshotEntry;
use crate::services::snapshot::SnapshotContents;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Records re-inserted from the snapshot.
    pub restored_count: usize,
    /// Records already present, patched ones included.
    pub skipped_count: usize,
    /// Present records whose zero size was corrected from the snapshot.
    pub patched_count: usize,
    pub failed_count: usize,
}

enum Outcome {
    Restored,
    Patched,
    Skipped,
}

pub struct Reconciler {
    catalog: Arc<dyn Catalog>,
    connection: Arc<dyn LiveConnection>,
    reconnect_delay: Duration,
}

impl Reconciler {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        connection: Arc<dyn LiveConnection>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            catalog,
            connection,
            reconnect_delay,
        }
    }

    /// Inserts every snapshot entry whose filename is not catalogued yet.
    ///
    /// Fails only when the database is unreachable or the catalog table is
    /// missing. Individual record failures are logged and counted.
    pub async fn reconcile(&self, entries: &[SnapshotEntry]) -> Result<ReconcileReport, BackupError> {
        self.ensure_connection().await?;

        if !self.catalog.table_exists().await? {
            return Err(BackupError::SchemaMissing);
        }

        tracing::info!(entries = entries.len(), "Reconciling backup list");

        let mut report = ReconcileReport::default();
        for entry in entries {
            match self.apply(entry).await {
                Ok(Outcome::Restored) => report.restored_count += 1,
                Ok(Outcome::Patched) => {
                    report.patched_count += 1;
                    report.skipped_count += 1;
                }
                Ok(Outcome::Skipped) => report.skipped_count += 1,
                Err(e) => {
                    report.failed_count += 1;
                    tracing::warn!(filename = %entry.filename, "Failed to restore backup record: {e}");
                }
            }
        }

        tracing::info!(
            restored = report.restored_count,
            skipped = report.skipped_count,
            patched = report.patched_count,
            failed = report.failed_count,
            "Backup list reconciled"
        );
        Ok(report)
    }

    /// Like [`Reconciler::reconcile`], counting entries that never parsed as failures.
    pub async fn reconcile_snapshot(
        &self,
        contents: &SnapshotContents,
    ) -> Result<ReconcileReport, BackupError> {
        let mut report = self.reconcile(&contents.entries).await?;
        report.failed_count += contents.malformed;
        Ok(report)
    }

    async fn ensure_connection(&self) -> Result<(), BackupError> {
        if let Err(e) = self.connection.probe().await {
            tracing::warn!("Database connection not usable before reconcile, reconnecting: {e}");
            self.connection.disconnect().await;
            tokio::time::sleep(self.reconnect_delay).await;
            self.connection.connect().await?;
            self.connection.probe().await?;
        }
        Ok(())
    }

    async fn apply(&self, entry: &SnapshotEntry) -> Result<Outcome, BackupError> {
        if entry.filename.trim().is_empty() {
            return Err(BackupError::Internal("snapshot entry has no filename".into()));
        }

        match self.catalog.find_by_filename(&entry.filename).await? {
            Some(existing) if existing.size == 0 && entry.normalized_size() > 0 => {
                self.catalog
                    .patch_metadata(existing.id, &entry.to_patch())
                    .await?;
                tracing::debug!(filename = %entry.filename, "Patched stale backup record");
                Ok(Outcome::Patched)
            }
            Some(_) => Ok(Outcome::Skipped),
            None => {
                self.catalog.insert(entry.to_new_backup()).await?;
                Ok(Outcome::Restored)
            }
        }
    }
}
