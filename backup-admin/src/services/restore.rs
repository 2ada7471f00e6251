//! Restore of a catalogued dump over the live database.
//!
//! The sequence is forward-only:
//!
//! ```text
//! Idle → Snapshotting → TerminatingConnections → Recreating → Restoring
//!      → Migrating → Reconnecting → Reconciling → Done
//! ```
//!
//! with `Failed` reachable from every step. The terminal stage is kept as the
//! last result and the machine returns to `Idle`. Nothing destructive happens before
//! the catalog snapshot is on disk. Dropping and recreating the database cannot
//! be undone, so a failure after that point only guarantees that the snapshot
//! is cleaned up and the error is reported; it does not roll anything back.

use crate::catalog::{self, Catalog};
use crate::db::LiveConnection;
use crate::error::BackupError;
use crate::models::backup::BackupRecord;
use crate::services::dump::artifact_path;
use crate::services::pg_tools::ConnectionDescriptor;
use crate::services::process::CommandRunner;
use crate::services::reconcile::{ReconcileReport, Reconciler};
use crate::services::snapshot::{SnapshotFile, SNAPSHOT_FILE_NAME};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStage {
    Idle,
    Snapshotting,
    TerminatingConnections,
    Recreating,
    Restoring,
    Migrating,
    Reconnecting,
    Reconciling,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RestoreSettings {
    pub backups_dir: PathBuf,
    pub database_url: Option<String>,
    pub migration_command: Vec<String>,
    pub command_timeout: Option<Duration>,
    pub reconnect_delay: Duration,
    pub settle_delay: Duration,
    pub settle_probe_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub backup: BackupRecord,
    /// Records in the snapshot taken before the restore.
    pub preserved: usize,
    pub report: ReconcileReport,
}

pub struct RestoreOrchestrator {
    catalog: Arc<dyn Catalog>,
    runner: Arc<dyn CommandRunner>,
    connection: Arc<dyn LiveConnection>,
    reconciler: Reconciler,
    snapshot: SnapshotFile,
    settings: RestoreSettings,
    stage: watch::Sender<RestoreStage>,
    last_result: watch::Sender<Option<RestoreStage>>,
}

impl RestoreOrchestrator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        runner: Arc<dyn CommandRunner>,
        connection: Arc<dyn LiveConnection>,
        settings: RestoreSettings,
    ) -> Self {
        let reconciler = Reconciler::new(
            catalog.clone(),
            connection.clone(),
            settings.reconnect_delay,
        );
        Self {
            snapshot: SnapshotFile::in_dir(&settings.backups_dir),
            catalog,
            runner,
            connection,
            reconciler,
            settings,
            stage: watch::Sender::new(RestoreStage::Idle),
            last_result: watch::Sender::new(None),
        }
    }

    pub fn stage(&self) -> RestoreStage {
        *self.stage.borrow()
    }

    /// `Done` or `Failed` of the most recent restore, if any has run.
    pub fn last_result(&self) -> Option<RestoreStage> {
        *self.last_result.borrow()
    }

    pub fn snapshot(&self) -> &SnapshotFile {
        &self.snapshot
    }

    fn enter(&self, stage: RestoreStage) {
        tracing::info!(stage = ?stage, "Restore stage");
        self.stage.send_replace(stage);
    }

    /// Records the terminal stage and returns the machine to `Idle`.
    fn finish(&self, terminal: RestoreStage) {
        self.enter(terminal);
        self.last_result.send_replace(Some(terminal));
        self.stage.send_replace(RestoreStage::Idle);
    }

    /// Replays a snapshot left behind by a restore that never finished.
    ///
    /// The file is removed only when reconciliation succeeds; otherwise it stays
    /// on disk for manual recovery.
    pub async fn recover_snapshot(&self) -> Result<Option<ReconcileReport>, BackupError> {
        if !self.snapshot.exists().await {
            return Ok(None);
        }

        tracing::warn!(
            path = %self.snapshot.path().display(),
            "Found backup list snapshot from an interrupted restore, reconciling"
        );
        let contents = self.snapshot.read().await?;
        let report = self.reconciler.reconcile_snapshot(&contents).await?;
        self.snapshot.remove().await;
        Ok(Some(report))
    }

    /// Replaces the live database with the contents of backup `id`.
    ///
    /// Not reentrant: callers must serialize restores against each other and
    /// against dumps.
    pub async fn restore(&self, id: i64) -> Result<RestoreOutcome, BackupError> {
        self.enter(RestoreStage::Snapshotting);
        let (backup, artifact, descriptor, preserved) = match self.preflight(id).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.finish(RestoreStage::Failed);
                return Err(e);
            }
        };

        match self.rebuild(&descriptor, &artifact).await {
            Ok(report) => {
                self.snapshot.remove().await;
                self.finish(RestoreStage::Done);
                tracing::info!(id, filename = %backup.filename, preserved, "Database restored");
                Ok(RestoreOutcome {
                    backup,
                    preserved,
                    report,
                })
            }
            Err(e) => {
                self.snapshot.remove().await;
                // Leave the application with a usable pool if the database exists at all.
                if let Err(reconnect) = self.connection.connect().await {
                    tracing::warn!("Reconnect after failed restore did not succeed: {reconnect}");
                }
                self.finish(RestoreStage::Failed);
                Err(e)
            }
        }
    }

    /// Everything that must hold before the first destructive step.
    async fn preflight(
        &self,
        id: i64,
    ) -> Result<(BackupRecord, PathBuf, ConnectionDescriptor, usize), BackupError> {
        let backup = catalog::get_by_id(self.catalog.as_ref(), id).await?;

        let artifact = artifact_path(&self.settings.backups_dir, &backup.filename)
            .filter(|p| p.is_file())
            .ok_or_else(|| {
                BackupError::NotFound(format!("Backup file not found: {}", backup.filename))
            })?;

        let descriptor = ConnectionDescriptor::from_config(self.settings.database_url.as_deref())?;

        // A leftover snapshot holds records the catalog may lack; fold them in
        // before the file is overwritten.
        if let Some(report) = self.recover_snapshot().await.map_err(|e| {
            tracing::error!(path = %self.snapshot.path().display(), "Leftover backup list snapshot could not be recovered: {e}");
            BackupError::Conflict(format!(
                "A backup list saved by an interrupted restore could not be recovered. \
                 Recover {SNAPSHOT_FILE_NAME} before restoring again."
            ))
        })? {
            tracing::info!(
                restored = report.restored_count,
                failed = report.failed_count,
                "Recovered backup list from interrupted restore before snapshotting"
            );
        }

        let preserved = self.snapshot.capture(self.catalog.as_ref()).await?;
        Ok((backup, artifact, descriptor, preserved))
    }

    async fn rebuild(
        &self,
        descriptor: &ConnectionDescriptor,
        artifact: &std::path::Path,
    ) -> Result<ReconcileReport, BackupError> {
        let timeout = self.settings.command_timeout;

        self.enter(RestoreStage::TerminatingConnections);
        self.connection.disconnect().await;
        if let Err(e) = self
            .runner
            .run(descriptor.terminate_connections_command(timeout))
            .await
        {
            tracing::warn!("Could not terminate other sessions, continuing: {e}");
        }

        self.enter(RestoreStage::Recreating);
        self.runner
            .run(descriptor.drop_database_command(timeout))
            .await
            .map_err(|e| BackupError::RestoreFailed(format!("dropping database: {e}")))?;
        self.runner
            .run(descriptor.create_database_command(timeout))
            .await
            .map_err(|e| BackupError::RestoreFailed(format!("creating database: {e}")))?;

        self.enter(RestoreStage::Restoring);
        self.runner
            .run(descriptor.restore_command(artifact))
            .await
            .map_err(|e| BackupError::RestoreFailed(format!("replaying dump: {e}")))?;

        self.enter(RestoreStage::Migrating);
        match descriptor.migration_command(&self.settings.migration_command, timeout) {
            Some(spec) => {
                if let Err(e) = self.runner.run(spec).await {
                    tracing::warn!("Schema migration after restore failed, continuing: {e}");
                }
            }
            None => tracing::info!("No migration command configured, skipping"),
        }

        self.enter(RestoreStage::Reconnecting);
        self.reconnect().await;

        self.enter(RestoreStage::Reconciling);
        let contents = self.snapshot.read().await?;
        self.reconciler.reconcile_snapshot(&contents).await
    }

    /// Re-creates the pool, then polls the probe until it answers or the
    /// attempts run out. Never fails; the reconciler probes again.
    async fn reconnect(&self) {
        self.connection.disconnect().await;
        tokio::time::sleep(self.settings.reconnect_delay).await;
        if let Err(e) = self.connection.connect().await {
            tracing::warn!("Re-creating the connection pool failed: {e}");
            return;
        }

        let attempts = self.settings.settle_probe_attempts.max(1);
        for attempt in 1..=attempts {
            match self.connection.probe().await {
                Ok(()) => {
                    tracing::debug!(attempt, "Database connection settled");
                    return;
                }
                Err(e) => {
                    tracing::debug!(attempt, "Database not ready yet: {e}");
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.settle_delay).await;
                    }
                }
            }
        }
        tracing::warn!(attempts, "Database connection did not settle, reconciling anyway");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::backup::SnapshotEntry;
    use crate::testing::{default_outcome, failed, record, FakeConnection, MemoryCatalog, ScriptedRunner};
    use std::path::Path;

    const URL: &str = "postgresql://app:hunter2@db:5432/appdb";

    fn settings(dir: &Path) -> RestoreSettings {
        RestoreSettings {
            backups_dir: dir.to_path_buf(),
            database_url: Some(URL.into()),
            migration_command: vec!["sqlx".into(), "migrate".into(), "run".into()],
            command_timeout: None,
            reconnect_delay: Duration::ZERO,
            settle_delay: Duration::ZERO,
            settle_probe_attempts: 3,
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        catalog: Arc<MemoryCatalog>,
        connection: Arc<FakeConnection>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                catalog: Arc::new(MemoryCatalog::new()),
                connection: Arc::new(FakeConnection::default()),
            }
        }

        /// A catalogued backup with its artifact on disk.
        fn backup(&self, filename: &str, size: i64) -> BackupRecord {
            std::fs::write(self.dir.path().join(filename), b"SELECT 1;").unwrap();
            self.catalog.seed(record(filename, size))
        }

        fn orchestrator(&self, runner: Arc<ScriptedRunner>) -> RestoreOrchestrator {
            RestoreOrchestrator::new(
                self.catalog.clone(),
                runner,
                self.connection.clone(),
                settings(self.dir.path()),
            )
        }

        fn snapshot_exists(&self) -> bool {
            self.dir.path().join("backup_list_temp.json").exists()
        }
    }

    /// A runner whose restore step empties the catalog the way a real
    /// drop/replay would, leaving only what the dump itself contained.
    fn wiping_runner(catalog: Arc<MemoryCatalog>, dumped: Vec<BackupRecord>) -> ScriptedRunner {
        ScriptedRunner::new(move |spec| {
            if spec.args.iter().any(|a| a.starts_with("DROP DATABASE")) {
                catalog.wipe();
            }
            if spec.args.iter().any(|a| a == "-f") {
                for row in &dumped {
                    catalog.seed(row.clone());
                }
            }
            default_outcome(spec)
        })
    }

    #[tokio::test]
    async fn test_full_restore_preserves_catalog() {
        let fx = Fixture::new();
        let target = fx.backup("backup_2025-01-01_00-00-00.sql", 100);
        fx.backup("backup_2025-02-01_00-00-00.sql", 200);
        fx.backup("backup_2025-03-01_00-00-00.sql", 300);

        let runner = Arc::new(wiping_runner(fx.catalog.clone(), Vec::new()));
        let orchestrator = fx.orchestrator(runner.clone());

        let outcome = orchestrator.restore(target.id).await.unwrap();

        assert_eq!(outcome.preserved, 3);
        assert_eq!(outcome.report.restored_count, 3);
        assert_eq!(outcome.backup.filename, target.filename);
        let mut names = fx.catalog.filenames();
        names.sort();
        assert_eq!(
            names,
            vec![
                "backup_2025-01-01_00-00-00.sql",
                "backup_2025-02-01_00-00-00.sql",
                "backup_2025-03-01_00-00-00.sql"
            ]
        );
        assert_eq!(orchestrator.last_result(), Some(RestoreStage::Done));
        assert!(!fx.snapshot_exists());

        let programs: Vec<String> = runner.calls().iter().map(|c| c.to_string()).collect();
        let position = |needle: &str| programs.iter().position(|p| p.contains(needle)).unwrap();
        assert!(position("pg_terminate_backend") < position("DROP DATABASE"));
        assert!(position("DROP DATABASE") < position("CREATE DATABASE"));
        assert!(position("CREATE DATABASE") < position(" -f "));
        assert!(position(" -f ") < position("sqlx migrate run"));
    }

    #[tokio::test]
    async fn test_stale_zero_size_row_from_dump_is_patched() {
        let fx = Fixture::new();
        let target = fx.backup("backup_a.sql", 4096);
        // the dump was taken while this backup was still being written
        let dumped = vec![record("backup_a.sql", 0)];

        let runner = Arc::new(wiping_runner(fx.catalog.clone(), dumped));
        let outcome = fx.orchestrator(runner).restore(target.id).await.unwrap();

        let rows = fx.catalog.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].size, 4096);
        assert_eq!(outcome.report.patched_count, 1);
    }

    #[tokio::test]
    async fn test_missing_artifact_fails_before_anything_destructive() {
        let fx = Fixture::new();
        let target = fx.catalog.seed(record("backup_gone.sql", 10));
        let runner = Arc::new(ScriptedRunner::succeeding());
        let orchestrator = fx.orchestrator(runner.clone());

        let err = orchestrator.restore(target.id).await.unwrap_err();

        assert!(matches!(err, BackupError::NotFound(_)));
        assert!(runner.calls().is_empty());
        assert_eq!(FakeConnection::count(&fx.connection.disconnects), 0);
        assert_eq!(orchestrator.last_result(), Some(RestoreStage::Failed));
        assert_eq!(fx.catalog.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let fx = Fixture::new();
        let runner = Arc::new(ScriptedRunner::succeeding());
        let err = fx.orchestrator(runner.clone()).restore(99).await.unwrap_err();
        assert!(matches!(err, BackupError::NotFound(m) if m.contains("99")));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_failure_aborts_before_destruction() {
        let fx = Fixture::new();
        let target = fx.backup("backup_a.sql", 1);
        // a directory where the snapshot file should go makes the rename fail
        std::fs::create_dir(fx.dir.path().join("backup_list_temp.json")).unwrap();
        std::fs::write(fx.dir.path().join("backup_list_temp.json/keep"), b"x").unwrap();

        let runner = Arc::new(ScriptedRunner::succeeding());
        let err = fx.orchestrator(runner.clone()).restore(target.id).await.unwrap_err();

        assert!(matches!(err, BackupError::SnapshotWriteFailed(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_terminate_failure_is_only_a_warning() {
        let fx = Fixture::new();
        let target = fx.backup("backup_a.sql", 1);
        let runner = Arc::new(ScriptedRunner::new(|spec| {
            if spec.to_string().contains("pg_terminate_backend") {
                return Err(failed(spec, "permission denied to terminate process"));
            }
            default_outcome(spec)
        }));

        fx.orchestrator(runner.clone()).restore(target.id).await.unwrap();
        assert!(runner.ran("DROP DATABASE"));
    }

    #[tokio::test]
    async fn test_migration_failure_is_only_a_warning() {
        let fx = Fixture::new();
        let target = fx.backup("backup_a.sql", 1);
        let runner = Arc::new(ScriptedRunner::new(|spec| {
            if spec.program == "sqlx" {
                return Err(failed(spec, "migration 0002 failed"));
            }
            default_outcome(spec)
        }));

        let orchestrator = fx.orchestrator(runner);
        orchestrator.restore(target.id).await.unwrap();
        assert_eq!(orchestrator.last_result(), Some(RestoreStage::Done));
    }

    #[tokio::test]
    async fn test_recreate_failure_is_fatal_and_cleans_up() {
        let fx = Fixture::new();
        let target = fx.backup("backup_a.sql", 1);
        let runner = Arc::new(ScriptedRunner::new(|spec| {
            if spec.to_string().contains("CREATE DATABASE") {
                return Err(failed(spec, "database \"appdb\" already exists"));
            }
            default_outcome(spec)
        }));

        let orchestrator = fx.orchestrator(runner.clone());
        let err = orchestrator.restore(target.id).await.unwrap_err();

        assert!(matches!(err, BackupError::RestoreFailed(_)));
        assert_eq!(orchestrator.last_result(), Some(RestoreStage::Failed));
        assert!(!fx.snapshot_exists());
        assert!(!runner.ran(" -f "));
        // pool is brought back after the failure
        assert_eq!(FakeConnection::count(&fx.connection.connects), 1);
    }

    #[tokio::test]
    async fn test_replay_failure_is_fatal() {
        let fx = Fixture::new();
        let target = fx.backup("backup_a.sql", 1);
        let runner = Arc::new(ScriptedRunner::new(|spec| {
            if spec.args.iter().any(|a| a == "-f") {
                return Err(failed(spec, "ERROR: syntax error at or near"));
            }
            default_outcome(spec)
        }));

        let err = fx.orchestrator(runner.clone()).restore(target.id).await.unwrap_err();
        assert!(matches!(err, BackupError::RestoreFailed(_)));
        assert!(!runner.ran("sqlx migrate"));
        assert!(!fx.snapshot_exists());
    }

    #[tokio::test]
    async fn test_missing_table_after_migration() {
        let fx = Fixture::new();
        let target = fx.backup("backup_a.sql", 1);
        let catalog = fx.catalog.clone();
        let runner = Arc::new(ScriptedRunner::new(move |spec| {
            if spec.args.iter().any(|a| a.starts_with("DROP DATABASE")) {
                catalog.set_table_present(false);
            }
            default_outcome(spec)
        }));

        let err = fx.orchestrator(runner).restore(target.id).await.unwrap_err();
        assert!(matches!(err, BackupError::SchemaMissing));
        assert!(!fx.snapshot_exists());
    }

    #[tokio::test]
    async fn test_settle_polls_probe() {
        let fx = Fixture {
            connection: Arc::new(FakeConnection::failing_probes(2)),
            ..Fixture::new()
        };
        let target = fx.backup("backup_a.sql", 1);

        fx.orchestrator(Arc::new(ScriptedRunner::succeeding()))
            .restore(target.id)
            .await
            .unwrap();

        // two failed settle probes, one success, one reconcile probe
        assert_eq!(FakeConnection::count(&fx.connection.probes), 4);
    }

    #[tokio::test]
    async fn test_database_unreachable_after_rebuild() {
        let fx = Fixture {
            connection: Arc::new(FakeConnection::failing_probes(100)),
            ..Fixture::new()
        };
        fx.connection
            .refuse_connect
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let target = fx.backup("backup_a.sql", 1);

        let orchestrator = fx.orchestrator(Arc::new(ScriptedRunner::succeeding()));
        assert!(orchestrator.restore(target.id).await.is_err());
        assert_eq!(orchestrator.last_result(), Some(RestoreStage::Failed));
        assert!(!fx.snapshot_exists());
        // reconnect step, reconciler retry, best-effort reconnect after failing
        assert_eq!(FakeConnection::count(&fx.connection.connects), 3);
    }

    #[tokio::test]
    async fn test_reconnect_error_is_only_a_warning() {
        let fx = Fixture::new();
        fx.connection
            .refuse_connect
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let target = fx.backup("backup_a.sql", 1);

        // probes still answer, so the reconciler carries on
        let orchestrator = fx.orchestrator(Arc::new(ScriptedRunner::succeeding()));
        orchestrator.restore(target.id).await.unwrap();
        assert_eq!(orchestrator.last_result(), Some(RestoreStage::Done));
    }

    #[tokio::test]
    async fn test_missing_configuration_is_not_destructive() {
        let fx = Fixture::new();
        let target = fx.backup("backup_a.sql", 1);
        let runner = Arc::new(ScriptedRunner::succeeding());
        let mut cfg = settings(fx.dir.path());
        cfg.database_url = None;
        let orchestrator =
            RestoreOrchestrator::new(fx.catalog.clone(), runner.clone(), fx.connection.clone(), cfg);

        let err = orchestrator.restore(target.id).await.unwrap_err();
        assert!(matches!(err, BackupError::ConfigurationMissing));
        assert!(runner.calls().is_empty());
        assert!(!fx.snapshot_exists());
    }

    #[tokio::test]
    async fn test_stage_returns_to_idle() {
        let fx = Fixture::new();
        let target = fx.backup("backup_a.sql", 1);
        let orchestrator = fx.orchestrator(Arc::new(ScriptedRunner::succeeding()));
        assert_eq!(orchestrator.last_result(), None);

        orchestrator.restore(target.id).await.unwrap();

        assert_eq!(orchestrator.stage(), RestoreStage::Idle);
        assert_eq!(orchestrator.last_result(), Some(RestoreStage::Done));
    }

    #[tokio::test]
    async fn test_leftover_snapshot_is_folded_in_not_overwritten() {
        let fx = Fixture::new();
        let target = fx.backup("backup_a.sql", 10);
        let leftover = vec![SnapshotEntry::from(&record("backup_lost.sql", 77))];
        std::fs::write(
            fx.dir.path().join("backup_list_temp.json"),
            serde_json::to_vec(&leftover).unwrap(),
        )
        .unwrap();

        let runner = Arc::new(wiping_runner(fx.catalog.clone(), Vec::new()));
        let outcome = fx.orchestrator(runner).restore(target.id).await.unwrap();

        assert_eq!(outcome.preserved, 2);
        let mut names = fx.catalog.filenames();
        names.sort();
        assert_eq!(names, vec!["backup_a.sql", "backup_lost.sql"]);
        let lost = fx
            .catalog
            .rows()
            .into_iter()
            .find(|r| r.filename == "backup_lost.sql")
            .unwrap();
        assert_eq!(lost.size, 77);
        assert!(!fx.snapshot_exists());
    }

    #[tokio::test]
    async fn test_unrecoverable_leftover_snapshot_blocks_restore() {
        let fx = Fixture::new();
        let target = fx.backup("backup_a.sql", 10);
        let leftover = fx.dir.path().join("backup_list_temp.json");
        std::fs::write(&leftover, b"{ truncated").unwrap();

        let runner = Arc::new(ScriptedRunner::succeeding());
        let orchestrator = fx.orchestrator(runner.clone());
        let err = orchestrator.restore(target.id).await.unwrap_err();

        assert!(matches!(err, BackupError::Conflict(m) if m.contains("backup_list_temp.json")));
        assert!(runner.calls().is_empty());
        assert_eq!(std::fs::read(&leftover).unwrap(), b"{ truncated");
        assert_eq!(orchestrator.last_result(), Some(RestoreStage::Failed));
    }
}
