pub mod auth;
pub mod backups;

use crate::services::backups::HealthReport;
use crate::state::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/backups", backups::router(state.clone()))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    match &state.backups {
        Some(service) => Json(service.health().await),
        None => Json(HealthReport::unconfigured()),
    }
}
