use crate::error::AppError;
use crate::services::system_stats::{self, HostStats};
use crate::state::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/stats", get(get_stats))
        .route("/api/notifications/config", get(notification_config))
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<HostStats>, AppError> {
    Ok(Json(system_stats::collect(&state.config.data_dir).await))
}

async fn notification_config(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    Ok(Json(json!({ "webhookUrl": state.settings.notifications.webhook_url })))
}
