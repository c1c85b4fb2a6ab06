use crate::error::AppError;
use crate::models::backup::BackupArtifact;
use crate::routes::checked_name;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::io::ReaderStream;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/{name}/backups", get(list_backups).post(create_backup))
        .route("/{name}/backups/{backup}", delete(delete_backup))
        .route("/{name}/backups/{backup}/restore", post(restore_backup))
        .route("/{name}/backups/{backup}/download", get(download_backup))
}

async fn list_backups(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, AppError> {
    let name = checked_name(&name)?;
    let backups: Vec<BackupArtifact> = state.backups.list(name).await?;
    Ok(Json(json!({ "backups": backups })))
}

async fn create_backup(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let name = checked_name(&name)?;
    let backup = state.backups.create(name).await?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "backup": backup }))))
}

async fn delete_backup(
    State(state): State<Arc<AppState>>,
    Path((name, backup)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let name = checked_name(&name)?;
    state.backups.delete(name, &backup).await?;
    Ok(Json(json!({ "success": true })))
}

async fn restore_backup(
    State(state): State<Arc<AppState>>,
    Path((name, backup)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let name = checked_name(&name)?;
    state.backups.restore(name, &backup).await?;
    Ok(Json(json!({ "success": true, "message": format!("Restored {} from {}", name, backup) })))
}

async fn download_backup(
    State(state): State<Arc<AppState>>,
    Path((name, backup)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let name = checked_name(&name)?;
    let path = state.backups.artifact_path(name, &backup).await?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to open backup: {}", e)))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to stat backup: {}", e)))?
        .len();

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", backup),
            ),
        ],
        body,
    ))
}
