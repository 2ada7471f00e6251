use crate::catalog::Catalog;
use crate::error::BackupError;
use crate::models::backup::{
    BackupRecord, BackupStatus, CreateBackupRequest, NewBackup, DEFAULT_BACKUP_TYPE,
};
use crate::services::pg_tools::ConnectionDescriptor;
use crate::services::process::CommandRunner;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// `backup_<UTC timestamp>.sql`, second resolution, no characters a
/// filesystem or a shell would object to.
pub fn backup_file_name(at: DateTime<Utc>) -> String {
    format!("backup_{}.sql", at.format("%Y-%m-%d_%H-%M-%S"))
}

/// Location of a catalogued artifact. Only the final path component of
/// `filename` is used, so a record can never point outside `backups_dir`.
pub fn artifact_path(backups_dir: &Path, filename: &str) -> Option<PathBuf> {
    let name = Path::new(filename).file_name()?;
    Some(backups_dir.join(name))
}

pub struct DumpExecutor {
    catalog: Arc<dyn Catalog>,
    runner: Arc<dyn CommandRunner>,
    backups_dir: PathBuf,
    database_url: Option<String>,
    timeout: Option<Duration>,
}

impl DumpExecutor {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        runner: Arc<dyn CommandRunner>,
        backups_dir: PathBuf,
        database_url: Option<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            catalog,
            runner,
            backups_dir,
            database_url,
            timeout,
        }
    }

    /// Dumps the live database and catalogs the artifact.
    ///
    /// No record is written unless the dump succeeded; a partial artifact is
    /// removed on failure.
    pub async fn create_backup(
        &self,
        request: CreateBackupRequest,
    ) -> Result<BackupRecord, BackupError> {
        let descriptor = ConnectionDescriptor::from_config(self.database_url.as_deref())?;

        tokio::fs::create_dir_all(&self.backups_dir).await?;
        let filename = backup_file_name(Utc::now());
        let artifact = self.backups_dir.join(&filename);
        claim(&artifact).await?;

        tracing::info!(filename = %filename, "Starting database dump");

        let spec = descriptor.dump_command(&artifact, self.timeout);
        if let Err(e) = self.runner.run(spec).await {
            discard_partial(&artifact).await;
            return Err(BackupError::DumpFailed(e.to_string()));
        }

        let size = match tokio::fs::metadata(&artifact).await {
            Ok(meta) => meta.len() as i64,
            Err(e) => {
                discard_partial(&artifact).await;
                return Err(BackupError::DumpFailed(format!(
                    "dump finished but {} is unreadable: {e}",
                    artifact.display()
                )));
            }
        };

        let new = NewBackup {
            filename: filename.clone(),
            description: request.description.filter(|d| !d.trim().is_empty()),
            size,
            backup_type: request
                .backup_type
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BACKUP_TYPE.to_string()),
            status: BackupStatus::Completed,
            url: Some(artifact.to_string_lossy().into_owned()),
            created_at: None,
            updated_at: None,
        };

        match self.catalog.insert(new).await {
            Ok(record) => {
                tracing::info!(id = record.id, filename = %record.filename, size, "Backup created");
                Ok(record)
            }
            Err(e) => {
                discard_partial(&artifact).await;
                Err(e)
            }
        }
    }
}

/// Creates the artifact exclusively. Two dumps in the same second collide here
/// rather than overwrite each other.
async fn claim(artifact: &Path) -> Result<(), BackupError> {
    match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(artifact)
        .await
    {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(BackupError::Conflict(
            "A backup with this timestamp is already being created. Please retry in a moment."
                .into(),
        )),
        Err(e) => Err(e.into()),
    }
}

async fn discard_partial(artifact: &Path) {
    match tokio::fs::remove_file(artifact).await {
        Ok(()) => tracing::info!(path = %artifact.display(), "Removed partial backup file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %artifact.display(), "Failed to remove partial backup file: {e}"),
    }
}
