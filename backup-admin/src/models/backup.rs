use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BACKUP_TYPE: &str = "full";
pub const RESTORED_DESCRIPTION: &str = "Restored backup";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    InProgress,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupStatus::InProgress => "in_progress",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "in_progress" => Some(BackupStatus::InProgress),
            "completed" => Some(BackupStatus::Completed),
            "failed" => Some(BackupStatus::Failed),
            _ => None,
        }
    }

    /// Any unknown or missing status is treated as completed.
    pub fn coerce(raw: Option<&str>) -> Self {
        raw.and_then(Self::parse).unwrap_or(BackupStatus::Completed)
    }
}

/// A catalog row describing one dump artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub id: i64,
    pub filename: String,
    pub description: Option<String>,
    pub size: i64,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub backup_type: String,
    pub status: String,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateBackupRequest {
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub backup_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResponse {
    pub message: String,
    pub backup_info: BackupRecord,
}

/// Row to insert. Timestamps default to now when `None`.
#[derive(Debug, Clone)]
pub struct NewBackup {
    pub filename: String,
    pub description: Option<String>,
    pub size: i64,
    pub backup_type: String,
    pub status: BackupStatus,
    pub url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// In-place correction of a stale catalog row.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataPatch {
    pub size: i64,
    pub url: Option<String>,
    pub status: BackupStatus,
}

/// One record as read back from a snapshot file.
///
/// Fields are optional so that a hand-edited or older snapshot still loads;
/// [`SnapshotEntry::to_new_backup`] fills the gaps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    #[serde(default)]
    pub id: Option<i64>,
    pub filename: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default, rename = "type")]
    pub backup_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SnapshotEntry {
    pub fn normalized_size(&self) -> i64 {
        self.size.unwrap_or(0).max(0)
    }

    pub fn normalized_status(&self) -> BackupStatus {
        BackupStatus::coerce(self.status.as_deref())
    }

    /// Drops the original id; the catalog assigns a new one.
    pub fn to_new_backup(&self) -> NewBackup {
        NewBackup {
            filename: self.filename.clone(),
            description: Some(
                self.description
                    .clone()
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| RESTORED_DESCRIPTION.to_string()),
            ),
            size: self.normalized_size(),
            backup_type: self
                .backup_type
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_BACKUP_TYPE.to_string()),
            status: self.normalized_status(),
            url: self.url.clone().filter(|u| !u.is_empty()),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn to_patch(&self) -> MetadataPatch {
        MetadataPatch {
            size: self.normalized_size(),
            url: self.url.clone().filter(|u| !u.is_empty()),
            status: self.normalized_status(),
        }
    }
}

impl From<&BackupRecord> for SnapshotEntry {
    fn from(r: &BackupRecord) -> Self {
        SnapshotEntry {
            id: Some(r.id),
            filename: r.filename.clone(),
            description: r.description.clone(),
            size: Some(r.size),
            backup_type: Some(r.backup_type.clone()),
            status: Some(r.status.clone()),
            url: r.url.clone(),
            created_at: Some(r.created_at),
            updated_at: Some(r.updated_at),
        }
    }
}
