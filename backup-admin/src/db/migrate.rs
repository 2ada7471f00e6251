use crate::db::connection::Database;

/// Catalog schema. Kept in step with `migrations/0001_create_backups.sql`.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS backups (
  id BIGSERIAL PRIMARY KEY,
  filename TEXT NOT NULL UNIQUE,
  description TEXT,
  size BIGINT NOT NULL DEFAULT 0 CHECK (size >= 0),
  type TEXT NOT NULL DEFAULT 'full',
  status TEXT NOT NULL DEFAULT 'completed' CHECK (status IN ('in_progress','completed','failed')),
  url TEXT,
  created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
  updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_backups_created_at ON backups(created_at DESC);
"#;

pub async fn migrate(db: &Database) -> anyhow::Result<()> {
    tracing::info!("[DB] Ensuring backup catalog schema...");

    let pool = db.pool().await;
    sqlx::raw_sql(SCHEMA).execute(&pool).await?;

    tracing::info!("[DB] Catalog schema ready");
    Ok(())
}
