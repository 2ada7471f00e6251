use crate::config::AppConfig;
use crate::error::BackupError;
use crate::services::BackupService;
use std::sync::Arc;

pub struct AppState {
    pub config: AppConfig,
    /// Absent when no database is configured; every backup call then fails
    /// with `ConfigurationMissing`.
    pub backups: Option<Arc<BackupService>>,
}

impl AppState {
    pub fn new(config: AppConfig, backups: Option<Arc<BackupService>>) -> Self {
        Self { config, backups }
    }

    pub fn backups(&self) -> Result<&BackupService, BackupError> {
        self.backups
            .as_deref()
            .ok_or(BackupError::ConfigurationMissing)
    }
}
