use crate::error::AppError;
use crate::models::backup::{BackupRecord, CreateBackupRequest, RestoreResponse};
use crate::routes::auth;
use crate::state::AppState;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_backups).post(create_backup))
        .route("/{id}", get(get_backup).delete(delete_backup))
        .route("/{id}/download", get(download_backup))
        .route("/{id}/restore", post(restore_backup))
        .route_layer(middleware::from_fn_with_state(state, auth::require_admin))
}

fn parse_id(raw: &str) -> Result<i64, AppError> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid backup id: {raw}")))
}

async fn create_backup(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<BackupRecord>), AppError> {
    let request: CreateBackupRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateBackupRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid request body: {e}")))?
    };

    let service = state.backups().map_err(|e| e.surface("Backup creation"))?;
    let record = service.create_backup(request).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_backups(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<BackupRecord>>, AppError> {
    let service = state.backups().map_err(|e| e.surface("Backup listing"))?;
    Ok(Json(service.list().await?))
}

async fn get_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BackupRecord>, AppError> {
    let id = parse_id(&id)?;
    let service = state.backups().map_err(|e| e.surface("Backup lookup"))?;
    Ok(Json(service.get(id).await?))
}

async fn download_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id)?;
    let service = state.backups().map_err(|e| e.surface("Backup download"))?;
    let artifact = service.download(id).await?;

    let file = tokio::fs::File::open(&artifact.path)
        .await
        .map_err(|e| AppError::from(crate::BackupError::from(e).surface("Backup download")))?;
    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        [
            (header::CONTENT_TYPE, "application/sql".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", artifact.filename),
            ),
            (header::CONTENT_LENGTH, artifact.size.to_string()),
        ],
        body,
    ))
}

async fn restore_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RestoreResponse>, AppError> {
    let id = parse_id(&id)?;
    let service = state.backups().map_err(|e| e.surface("Database restore"))?;
    Ok(Json(service.restore(id).await?))
}

async fn delete_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(&id)?;
    let service = state.backups().map_err(|e| e.surface("Backup deletion"))?;
    service.delete(id).await?;
    Ok(Json(json!({ "message": "Backup deleted successfully" })))
}
