use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MIGRATION_COMMAND: &str = "sqlx migrate run --source migrations";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// Connection descriptor of the live database. Checked per operation, not at load.
    pub database_url: Option<String>,
    pub backups_dir: PathBuf,
    pub admin_token: Option<String>,
    pub log_level: String,
    pub db_max_connections: u32,
    /// Program and arguments of the schema-migration tool run after a restore.
    pub migration_command: Vec<String>,
    pub command_timeout: Option<Duration>,
    pub reconnect_delay: Duration,
    pub settle_delay: Duration,
    pub settle_probe_attempts: u32,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            backups_dir: PathBuf::from(
                std::env::var("BACKUPS_DIR").unwrap_or_else(|_| "backups".into()),
            ),
            admin_token: std::env::var("ADMIN_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            migration_command: parse_command(
                &std::env::var("MIGRATION_COMMAND")
                    .unwrap_or_else(|_| DEFAULT_MIGRATION_COMMAND.into()),
            ),
            command_timeout: std::env::var("COMMAND_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs),
            reconnect_delay: Duration::from_millis(
                std::env::var("RECONNECT_DELAY_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1000),
            ),
            settle_delay: Duration::from_millis(
                std::env::var("SETTLE_DELAY_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(3000),
            ),
            settle_probe_attempts: std::env::var("SETTLE_PROBE_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        }
    }

    /// Absolute backup directory, so that catalog `url`s stay valid regardless of cwd.
    pub fn resolved_backups_dir(&self) -> PathBuf {
        if self.backups_dir.is_absolute() {
            return self.backups_dir.clone();
        }
        std::env::current_dir()
            .map(|cwd| cwd.join(&self.backups_dir))
            .unwrap_or_else(|_| self.backups_dir.clone())
    }
}

/// Splits a command line on whitespace. Quoting is not supported.
pub fn parse_command(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}
