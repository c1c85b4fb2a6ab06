use crate::error::AppError;
use crate::models::health::HealthSample;
use crate::models::instance::{
    is_valid_name, CreateInstanceRequest, InstanceRecord, InstanceStatus, UpgradeRequest,
};
use crate::routes::checked_name;
use crate::services::lifecycle::{AddArgs, LifecycleOp};
use crate::services::logs::{read_instance_logs, InstanceLogs};
use crate::services::manifest_store::{parse_requested_port, ManifestError};
use crate::services::system_stats::dir_size;
use crate::services::versions::is_valid_version;
use crate::state::AppState;
use crate::utils::format::format_bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

const DEFAULT_PASSWORD: &str = "changeme123";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_instances).post(create_instance))
        .route("/{name}", get(get_instance).delete(delete_instance))
        .route("/{name}/start", post(start_instance))
        .route("/{name}/stop", post(stop_instance))
        .route("/{name}/restart", post(restart_instance))
        .route("/{name}/upgrade", post(upgrade_instance))
        .route("/{name}/logs", get(get_logs))
        .route("/{name}/history", get(get_history))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSummary {
    pub name: String,
    pub port: u16,
    pub status: InstanceStatus,
    pub created: DateTime<Utc>,
    pub version: Option<String>,
    pub memory_limit: Option<String>,
    /// Human readable data directory size
    pub size: String,
    pub healthy: bool,
}

async fn summarize(state: &AppState, name: &str, record: InstanceRecord) -> InstanceSummary {
    let (healthy, size) = tokio::join!(
        state.monitor.probe_port(record.port),
        dir_size(state.config.instance_dir(name)),
    );
    InstanceSummary {
        name: name.to_string(),
        port: record.port,
        status: record.status,
        created: record.created,
        version: record.version,
        memory_limit: record.memory_limit,
        size: format_bytes(size),
        healthy,
    }
}

async fn require_record(state: &AppState, name: &str) -> Result<InstanceRecord, AppError> {
    state
        .manifest
        .get(name)
        .await
        .ok_or_else(|| AppError::NotFound("Instance not found".into()))
}

async fn list_instances(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let manifest = state.manifest.load().await;
    let instances = join_all(
        manifest
            .into_iter()
            .map(|(name, record)| {
                let state = state.clone();
                async move { summarize(&state, &name, record).await }
            }),
    )
    .await;
    Ok(Json(json!({ "instances": instances })))
}

async fn create_instance(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateInstanceRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Instance name required".into()));
    }
    if !is_valid_name(name) {
        return Err(ManifestError::InvalidName.into());
    }
    if let Some(v) = body.version.as_deref() {
        if !is_valid_version(v) {
            return Err(AppError::BadRequest("Invalid version".into()));
        }
    }
    let requested = parse_requested_port(body.port.as_ref(), state.manifest.port_range())?;

    // Reserving the record first keeps concurrent creates from sharing a port.
    let record = state
        .manifest
        .insert_new(name, requested, body.version.clone(), body.memory.clone())
        .await?;

    let args = AddArgs {
        email: body.email.as_deref(),
        password: body.password.as_deref(),
        port: record.port,
        memory: body.memory.as_deref(),
        version: body.version.as_deref(),
    }
    .to_args();
    let out = state.lifecycle.invoke(LifecycleOp::Add, name, &args).await;
    if !out.ok {
        if let Err(e) = state.manifest.remove(name).await {
            tracing::error!(instance = name, error = %e, "Failed to release reservation after add failure");
        }
        return Err(AppError::Script(out.diagnostic()));
    }

    let record = state
        .manifest
        .modify(name, |r| r.status = InstanceStatus::Running)
        .await?;
    tracing::info!(instance = name, port = record.port, "Instance created");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "instance": {
                "name": name,
                "port": record.port,
                "status": record.status,
                "created": record.created,
                "version": record.version,
                "memoryLimit": record.memory_limit,
            },
            "credentials": {
                "email": body.email.clone().unwrap_or_else(|| format!("admin@{}.local", name)),
                "password": body.password.clone().unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
            },
        })),
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InstanceDetail {
    #[serde(flatten)]
    summary: InstanceSummary,
    backups: Vec<crate::models::backup::BackupArtifact>,
    history: Vec<HealthSample>,
    restore_pending: bool,
}

async fn get_instance(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<InstanceDetail>, AppError> {
    let name = checked_name(&name)?;
    let record = require_record(&state, name).await?;

    let (summary, backups, history, restore_pending) = tokio::join!(
        summarize(&state, name, record),
        state.backups.list(name),
        state.monitor.history(name),
        state.backups.restore_pending(name),
    );
    Ok(Json(InstanceDetail {
        summary,
        backups: backups?,
        history,
        restore_pending,
    }))
}

async fn delete_instance(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, AppError> {
    let name = checked_name(&name)?;
    require_record(&state, name).await?;

    let out = state
        .lifecycle
        .invoke(LifecycleOp::Remove, name, &["--delete-data".to_string()])
        .await;
    if !out.ok {
        return Err(AppError::Script(out.diagnostic()));
    }

    state.manifest.remove(name).await?;
    state.monitor.forget(name).await;
    if let Err(e) = state.backups.purge_data(name).await {
        tracing::warn!(instance = name, error = %e, "Failed to remove leftover data directory");
    }
    tracing::info!(instance = name, "Instance removed");
    Ok(Json(json!({ "success": true })))
}

async fn start_instance(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, AppError> {
    let name = checked_name(&name)?;
    require_record(&state, name).await?;
    let out = state.lifecycle.start(name).await;
    record_start_result(&state, name, out.ok).await?;
    if !out.ok {
        return Err(AppError::Script(out.diagnostic()));
    }
    Ok(Json(json!({ "success": true })))
}

async fn stop_instance(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, AppError> {
    let name = checked_name(&name)?;
    require_record(&state, name).await?;
    let out = state.lifecycle.stop(name).await;
    if !out.ok {
        return Err(AppError::Script(out.diagnostic()));
    }
    state
        .manifest
        .modify(name, |r| r.status = InstanceStatus::Stopped)
        .await?;
    Ok(Json(json!({ "success": true })))
}

async fn restart_instance(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, AppError> {
    let name = checked_name(&name)?;
    require_record(&state, name).await?;
    let out = state.lifecycle.restart(name).await;
    record_start_result(&state, name, out.ok).await?;
    if !out.ok {
        return Err(AppError::Script(out.diagnostic()));
    }
    Ok(Json(json!({ "success": true })))
}

async fn record_start_result(state: &AppState, name: &str, ok: bool) -> Result<(), AppError> {
    let status = if ok {
        InstanceStatus::Running
    } else {
        InstanceStatus::Error
    };
    state.manifest.modify(name, |r| r.status = status).await?;
    Ok(())
}

/// Stop, fetch the release, record it, start again.
async fn upgrade_instance(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<UpgradeRequest>,
) -> Result<Json<Value>, AppError> {
    let name = checked_name(&name)?;
    let version = body.version.trim();
    if version.is_empty() {
        return Err(AppError::BadRequest("Version required".into()));
    }
    if !is_valid_version(version) {
        return Err(AppError::BadRequest("Invalid version".into()));
    }
    require_record(&state, name).await?;

    let stopped = state.lifecycle.stop(name).await;
    if !stopped.ok {
        tracing::warn!(instance = name, error = %stopped.diagnostic(), "Stop before upgrade failed, continuing");
    }

    let downloaded = state.versions.download(version).await;
    if !downloaded.ok {
        let out = state.lifecycle.start(name).await;
        record_start_result(&state, name, out.ok).await?;
        return Err(AppError::Script(downloaded.diagnostic()));
    }

    state
        .manifest
        .modify(name, |r| r.version = Some(version.to_string()))
        .await?;

    let out = state.lifecycle.start(name).await;
    record_start_result(&state, name, out.ok).await?;
    if !out.ok {
        return Err(AppError::Script(out.diagnostic()));
    }
    tracing::info!(instance = name, version, "Instance upgraded");
    Ok(Json(json!({ "success": true, "version": version })))
}

async fn get_logs(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<InstanceLogs>, AppError> {
    let name = checked_name(&name)?;
    Ok(Json(read_instance_logs(&state.config.log_dir, name).await))
}

async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, AppError> {
    let name = checked_name(&name)?;
    Ok(Json(json!({ "history": state.monitor.history(name).await })))
}
