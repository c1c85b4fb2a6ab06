use crate::error::AppError;
use crate::services::versions::is_valid_version;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/latest", get(latest_version))
        .route("/available", get(available_versions))
        .route("/installed", get(installed_versions))
        .route("/download", post(download_version))
        .route("/{version}", delete(delete_version))
}

#[derive(Debug, Deserialize)]
struct DownloadRequest {
    #[serde(default)]
    version: String,
}

fn checked_version(version: &str) -> Result<&str, AppError> {
    let version = version.trim();
    if version.is_empty() {
        return Err(AppError::BadRequest("Version required".into()));
    }
    if !is_valid_version(version) {
        return Err(AppError::BadRequest("Invalid version".into()));
    }
    Ok(version)
}

async fn latest_version(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let version = state.versions.latest().await.map_err(AppError::Script)?;
    Ok(Json(json!({ "version": version })))
}

async fn available_versions(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let versions = state.versions.available().await.map_err(AppError::Script)?;
    Ok(Json(json!({ "versions": versions })))
}

async fn installed_versions(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    Ok(Json(json!({ "versions": state.versions.installed().await })))
}

async fn download_version(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DownloadRequest>,
) -> Result<Json<Value>, AppError> {
    let version = checked_version(&body.version)?;
    let out = state.versions.download(version).await;
    if !out.ok {
        return Err(AppError::Script(out.diagnostic()));
    }
    tracing::info!(version, "Release downloaded");
    Ok(Json(json!({ "success": true, "version": version })))
}

async fn delete_version(
    State(state): State<Arc<AppState>>,
    Path(version): Path<String>,
) -> Result<Json<Value>, AppError> {
    let version = checked_version(&version)?;
    let out = state.versions.delete(version).await;
    if !out.ok {
        return Err(AppError::Script(out.diagnostic()));
    }
    tracing::info!(version, "Release deleted");
    Ok(Json(json!({ "success": true })))
}
