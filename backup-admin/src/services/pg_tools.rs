//! Command lines for the PostgreSQL client tools.

use crate::error::BackupError;
use crate::services::process::{CommandSpec, RESTORE_MAX_OUTPUT};
use std::path::Path;
use std::time::Duration;
use percent_encoding::percent_decode_str;
use url::Url;

/// Database that drop/create/terminate statements are issued against.
const MAINTENANCE_DATABASE: &str = "postgres";
const DEFAULT_PORT: u16 = 5432;

/// Parsed `DATABASE_URL` of the live database.
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    url: Url,
}

impl ConnectionDescriptor {
    /// Resolves the descriptor from configuration. Absent → `ConfigurationMissing`.
    pub fn from_config(database_url: Option<&str>) -> Result<Self, BackupError> {
        let raw = database_url
            .filter(|v| !v.trim().is_empty())
            .ok_or(BackupError::ConfigurationMissing)?;
        Self::parse(raw)
    }

    pub fn parse(raw: &str) -> Result<Self, BackupError> {
        let url = Url::parse(raw.trim()).map_err(|e| {
            BackupError::Internal(format!("Database connection descriptor is invalid: {e}"))
        })?;
        if !matches!(url.scheme(), "postgres" | "postgresql") {
            return Err(BackupError::Internal(format!(
                "Unsupported database scheme: {}",
                url.scheme()
            )));
        }
        let descriptor = Self { url };
        if descriptor.database().is_empty() {
            return Err(BackupError::Internal(
                "Database connection descriptor has no database name".into(),
            ));
        }
        Ok(descriptor)
    }

    pub fn database(&self) -> String {
        percent_decode(self.url.path().trim_start_matches('/'))
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or("localhost")
    }

    pub fn port(&self) -> u16 {
        self.url.port().unwrap_or(DEFAULT_PORT)
    }

    pub fn username(&self) -> String {
        percent_decode(self.url.username())
    }

    pub fn password(&self) -> Option<String> {
        self.url.password().map(percent_decode)
    }

    /// The URL without ORM-specific query parameters or fragment.
    pub fn clean_url(&self) -> Url {
        let mut url = self.url.clone();
        url.set_query(None);
        url.set_fragment(None);
        url
    }

    /// The clean URL with the password removed; the password travels via `PGPASSWORD`.
    fn tool_url(&self) -> String {
        let mut url = self.clean_url();
        let _ = url.set_password(None);
        url.to_string()
    }

    fn with_password(&self, spec: CommandSpec) -> CommandSpec {
        match self.password() {
            Some(pw) => spec.env("PGPASSWORD", pw),
            None => spec,
        }
    }

    fn psql(&self, database: &str) -> CommandSpec {
        let mut spec = CommandSpec::new("psql").args(["-X", "-h", self.host()]);
        spec = spec.arg("-p").arg(self.port().to_string());
        let username = self.username();
        if !username.is_empty() {
            spec = spec.arg("-U").arg(username);
        }
        self.with_password(spec.arg("-d").arg(database))
    }

    fn maintenance_statement(&self, sql: String, timeout: Option<Duration>) -> CommandSpec {
        self.psql(MAINTENANCE_DATABASE)
            .args(["-v", "ON_ERROR_STOP=1", "-c"])
            .arg(sql)
            .timeout(timeout)
    }

    /// `pg_dump` writing a plain SQL dump to `artifact`.
    pub fn dump_command(&self, artifact: &Path, timeout: Option<Duration>) -> CommandSpec {
        self.with_password(
            CommandSpec::new("pg_dump")
                .arg(format!("--dbname={}", self.tool_url()))
                .stdout_to(artifact)
                .timeout(timeout),
        )
    }

    pub fn terminate_connections_command(&self, timeout: Option<Duration>) -> CommandSpec {
        self.maintenance_statement(
            format!(
                "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = {} AND pid <> pg_backend_pid();",
                quote_literal(&self.database())
            ),
            timeout,
        )
    }

    pub fn drop_database_command(&self, timeout: Option<Duration>) -> CommandSpec {
        self.maintenance_statement(
            format!("DROP DATABASE IF EXISTS {};", quote_ident(&self.database())),
            timeout,
        )
    }

    pub fn create_database_command(&self, timeout: Option<Duration>) -> CommandSpec {
        self.maintenance_statement(
            format!("CREATE DATABASE {};", quote_ident(&self.database())),
            timeout,
        )
    }

    /// Replays `artifact` into the live database. Runs without a timeout.
    pub fn restore_command(&self, artifact: &Path) -> CommandSpec {
        self.psql(&self.database())
            .arg("-f")
            .arg(artifact.to_string_lossy())
            .max_output(RESTORE_MAX_OUTPUT)
    }

    /// The configured migration tool, with the live database URL in its environment.
    pub fn migration_command(
        &self,
        command: &[String],
        timeout: Option<Duration>,
    ) -> Option<CommandSpec> {
        let (program, args) = command.split_first()?;
        let mut spec = CommandSpec::new(program.as_str())
            .args(args.iter().cloned())
            .env("DATABASE_URL", self.url.as_str())
            .timeout(timeout);
        if let Ok(cwd) = std::env::current_dir() {
            spec = spec.current_dir(cwd);
        }
        Some(self.with_password(spec))
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn percent_decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}
