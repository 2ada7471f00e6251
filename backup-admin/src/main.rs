use backup_admin::catalog::PgCatalog;
use backup_admin::config::AppConfig;
use backup_admin::db::{migrate::migrate, Database};
use backup_admin::routes;
use backup_admin::services::pg_tools::ConnectionDescriptor;
use backup_admin::services::process::ProcessRunner;
use backup_admin::services::{BackupService, BackupSettings};
use backup_admin::state::AppState;
use backup_admin::utils::logger;
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    logger::init(&config.log_level)?;
    tracing::info!("Starting backup admin on port {}", config.port);

    let backups_dir = config.resolved_backups_dir();
    std::fs::create_dir_all(&backups_dir)?;
    tracing::info!(path = %backups_dir.display(), "Backup directory ready");

    if config.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN is not set - every backup request will be rejected");
    }

    let database = match &config.database_url {
        Some(url) => {
            let descriptor = ConnectionDescriptor::parse(url)?;
            let db = Arc::new(Database::connect_lazy(
                descriptor.clean_url().as_str(),
                config.db_max_connections,
            )?);
            if let Err(e) = migrate(&db).await {
                tracing::warn!("Catalog schema check failed: {e:#}");
            }
            Some(db)
        }
        None => {
            tracing::warn!("DATABASE_URL is not set - backup operations are unavailable");
            None
        }
    };

    let service = database.clone().map(|db| {
        Arc::new(BackupService::new(
            BackupSettings::from_config(&config),
            Arc::new(PgCatalog::new(db.clone())),
            Arc::new(ProcessRunner),
            db,
        ))
    });

    // Interrupted restores leave their snapshot behind
    if let Some(service) = &service {
        match service.recover_stale_snapshot().await {
            Ok(Some(report)) => tracing::info!(
                restored = report.restored_count,
                skipped = report.skipped_count,
                "Recovered backup list from interrupted restore"
            ),
            Ok(None) => {}
            Err(e) => tracing::error!(
                "Could not recover backup list from interrupted restore, snapshot left in place: {e}"
            ),
        }
    }

    let state = Arc::new(AppState::new(config.clone(), service));
    let app = routes::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down...");
    if let Some(db) = database {
        db.close().await;
    }
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
