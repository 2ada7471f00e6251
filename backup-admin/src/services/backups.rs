use crate::catalog::{self, Catalog};
use crate::config::AppConfig;
use crate::db::LiveConnection;
use crate::error::BackupError;
use crate::models::backup::{BackupRecord, CreateBackupRequest, RestoreResponse};
use crate::services::dump::{artifact_path, DumpExecutor};
use crate::services::process::CommandRunner;
use crate::services::reconcile::ReconcileReport;
use crate::services::restore::{RestoreOrchestrator, RestoreSettings, RestoreStage};
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

const RESTORE_BUSY: &str =
    "A database restore is in progress. Please try again once it has finished.";
const OPERATION_BUSY: &str =
    "Another backup operation is in progress. Please try again once it has finished.";

#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub backups_dir: PathBuf,
    pub restore: RestoreSettings,
}

impl BackupSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let backups_dir = config.resolved_backups_dir();
        Self {
            restore: RestoreSettings {
                backups_dir: backups_dir.clone(),
                database_url: config.database_url.clone(),
                migration_command: config.migration_command.clone(),
                command_timeout: config.command_timeout,
                reconnect_delay: config.reconnect_delay,
                settle_delay: config.settle_delay,
                settle_probe_attempts: config.settle_probe_attempts,
            },
            backups_dir,
        }
    }
}

/// A catalogued artifact ready to be streamed.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub database: &'static str,
    pub restore_stage: RestoreStage,
    /// Outcome of the most recent restore since startup.
    pub last_restore: Option<RestoreStage>,
}

impl HealthReport {
    /// Reported when no database is configured at all.
    pub fn unconfigured() -> Self {
        Self {
            status: "degraded",
            database: "unconfigured",
            restore_stage: RestoreStage::Idle,
            last_restore: None,
        }
    }
}

/// Entry point for every backup operation.
///
/// Dumps and deletions share the operations lock; a restore holds it
/// exclusively. Errors leaving this type are already sanitized, and the raw
/// detail has been logged.
pub struct BackupService {
    catalog: Arc<dyn Catalog>,
    connection: Arc<dyn LiveConnection>,
    dumps: DumpExecutor,
    restorer: RestoreOrchestrator,
    backups_dir: PathBuf,
    operations: RwLock<()>,
}

impl BackupService {
    pub fn new(
        settings: BackupSettings,
        catalog: Arc<dyn Catalog>,
        runner: Arc<dyn CommandRunner>,
        connection: Arc<dyn LiveConnection>,
    ) -> Self {
        let dumps = DumpExecutor::new(
            catalog.clone(),
            runner.clone(),
            settings.backups_dir.clone(),
            settings.restore.database_url.clone(),
            settings.restore.command_timeout,
        );
        let restorer =
            RestoreOrchestrator::new(catalog.clone(), runner, connection.clone(), settings.restore);
        Self {
            catalog,
            connection,
            dumps,
            restorer,
            backups_dir: settings.backups_dir,
            operations: RwLock::new(()),
        }
    }

    pub async fn create_backup(
        &self,
        request: CreateBackupRequest,
    ) -> Result<BackupRecord, BackupError> {
        const CONTEXT: &str = "Backup creation";
        let _shared = self
            .operations
            .try_read()
            .map_err(|_| BackupError::Conflict(RESTORE_BUSY.into()))?;

        self.dumps
            .create_backup(request)
            .await
            .map_err(|e| fail(CONTEXT, None, None, e))
    }

    pub async fn list(&self) -> Result<Vec<BackupRecord>, BackupError> {
        self.catalog
            .list()
            .await
            .map_err(|e| fail("Backup listing", None, None, e))
    }

    pub async fn get(&self, id: i64) -> Result<BackupRecord, BackupError> {
        catalog::get_by_id(self.catalog.as_ref(), id)
            .await
            .map_err(|e| fail("Backup lookup", Some(id), None, e))
    }

    pub async fn download(&self, id: i64) -> Result<Artifact, BackupError> {
        const CONTEXT: &str = "Backup download";
        let backup = self.get(id).await?;

        let missing =
            || BackupError::NotFound(format!("Backup file not found: {}", backup.filename));
        let path = artifact_path(&self.backups_dir, &backup.filename).ok_or_else(missing)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Err(missing()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(missing()),
            Err(e) => return Err(fail(CONTEXT, Some(id), Some(&backup.filename), e.into())),
        };

        Ok(Artifact {
            path,
            size: meta.len(),
            filename: backup.filename,
        })
    }

    /// Removes the artifact, then the record. A missing artifact is tolerated;
    /// one that exists but cannot be removed keeps the record in place.
    pub async fn delete(&self, id: i64) -> Result<(), BackupError> {
        const CONTEXT: &str = "Backup deletion";
        let _shared = self
            .operations
            .try_read()
            .map_err(|_| BackupError::Conflict(RESTORE_BUSY.into()))?;

        let backup = self.get(id).await?;
        let result = async {
            if let Some(path) = artifact_path(&self.backups_dir, &backup.filename) {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => tracing::info!(path = %path.display(), "Backup file deleted"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        tracing::warn!(path = %path.display(), "Backup file already missing, deleting record only")
                    }
                    Err(e) => return Err(BackupError::from(e)),
                }
            }
            if !self.catalog.delete(id).await? {
                return Err(BackupError::NotFound(format!("Backup with ID {id} not found")));
            }
            Ok::<(), BackupError>(())
        }
        .await;

        result.map_err(|e| fail(CONTEXT, Some(id), Some(&backup.filename), e))?;
        tracing::info!(id, filename = %backup.filename, "Backup deleted");
        Ok(())
    }

    pub async fn restore(&self, id: i64) -> Result<RestoreResponse, BackupError> {
        const CONTEXT: &str = "Database restore";
        let _exclusive = self
            .operations
            .try_write()
            .map_err(|_| BackupError::Conflict(OPERATION_BUSY.into()))?;

        let outcome = self
            .restorer
            .restore(id)
            .await
            .map_err(|e| fail(CONTEXT, Some(id), None, e))?;

        Ok(RestoreResponse {
            message: format!(
                "Database restored successfully from backup: {}. Backup list preserved ({} entries, {} restored, {} skipped).",
                outcome.backup.filename,
                outcome.preserved,
                outcome.report.restored_count,
                outcome.report.skipped_count
            ),
            backup_info: outcome.backup,
        })
    }

    /// Replays a snapshot left behind by a restore that never finished.
    ///
    /// The file is removed only when reconciliation succeeds; otherwise it stays
    /// on disk for manual recovery.
    pub async fn recover_stale_snapshot(&self) -> Result<Option<ReconcileReport>, BackupError> {
        self.restorer.recover_snapshot().await
    }

    pub fn restore_stage(&self) -> RestoreStage {
        self.restorer.stage()
    }

    pub fn last_restore(&self) -> Option<RestoreStage> {
        self.restorer.last_result()
    }

    pub async fn health(&self) -> HealthReport {
        let database_up = match self.connection.probe().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Health probe failed: {e}");
                false
            }
        };
        HealthReport {
            status: if database_up { "ok" } else { "degraded" },
            database: if database_up { "up" } else { "down" },
            restore_stage: self.restore_stage(),
            last_restore: self.last_restore(),
        }
    }
}

/// Logs the raw failure for operators and returns its caller-safe form.
fn fail(context: &str, id: Option<i64>, filename: Option<&str>, err: BackupError) -> BackupError {
    let timestamp = Utc::now().to_rfc3339();
    match &err {
        BackupError::NotFound(_) | BackupError::Conflict(_) => tracing::warn!(
            target: "backup_admin::audit",
            context, backup_id = ?id, filename = ?filename, %timestamp,
            "{err}"
        ),
        _ => tracing::error!(
            target: "backup_admin::audit",
            context, backup_id = ?id, filename = ?filename, %timestamp,
            error = ?err,
            "{context} failed: {err}"
        ),
    }
    err.surface(context)
}
