use crate::services::process::ProcessError;
use crate::utils::sanitizer::{self, FailureKind};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Failures of backup, restore and catalog operations.
///
/// Variants carrying raw detail (`DumpFailed`, `RestoreFailed`, `Database`, ...) must go
/// through [`BackupError::surface`] before they leave the service.
#[derive(thiserror::Error, Debug)]
pub enum BackupError {
    #[error("{0}")]
    NotFound(String),

    #[error("DATABASE_URL environment variable is not set")]
    ConfigurationMissing,

    #[error("Dump failed: {0}")]
    DumpFailed(String),

    #[error("Restore failed: {0}")]
    RestoreFailed(String),

    #[error("Failed to save backup list before restore: {0}")]
    SnapshotWriteFailed(String),

    #[error("Backup table not found after database restore. Schema migration may have failed.")]
    SchemaMissing,

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl BackupError {
    /// Converts an error into the form a caller may see.
    ///
    /// `NotFound` and `Conflict` keep their (sanitized) text. Everything else is
    /// classified into a canned message for `context`.
    pub fn surface(self, context: &str) -> BackupError {
        match self {
            BackupError::NotFound(m) => BackupError::NotFound(sanitizer::sanitize(&m)),
            BackupError::Conflict(m) => BackupError::Conflict(m),
            BackupError::ConfigurationMissing => BackupError::Internal(format!(
                "{context} failed: the database connection is not configured. Please contact an administrator."
            )),
            BackupError::SnapshotWriteFailed(_) => {
                BackupError::Internal("Failed to save backup list before restore".into())
            }
            BackupError::SchemaMissing => BackupError::Internal(format!(
                "{context} failed: the backup catalog is missing after restore. Schema migration may have failed."
            )),
            // Already user-facing.
            e @ (BackupError::PermissionDenied(_) | BackupError::Timeout(_)) => e,
            other => {
                let raw = other.to_string();
                let message = sanitizer::classify(&raw, context);
                match FailureKind::detect(&raw) {
                    Some(FailureKind::PermissionDenied) => BackupError::PermissionDenied(message),
                    Some(FailureKind::Timeout) => BackupError::Timeout(message),
                    _ => BackupError::Internal(message),
                }
            }
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Operation(String),
}

impl From<BackupError> for AppError {
    fn from(e: BackupError) -> Self {
        match e {
            BackupError::NotFound(m) => AppError::NotFound(sanitizer::sanitize(&m)),
            BackupError::Conflict(m) => AppError::Conflict(m),
            other => AppError::Operation(sanitizer::sanitize(&other.to_string())),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            AppError::Operation(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}
