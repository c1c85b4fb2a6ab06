use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/check/{port}", get(check_port))
        .route("/used", get(used_ports))
}

async fn check_port(
    State(state): State<Arc<AppState>>,
    Path(port): Path<u16>,
) -> Result<Json<Value>, AppError> {
    let manifest = state.manifest.load().await;
    let in_use = manifest.values().any(|r| r.port == port);
    let in_range = state.manifest.port_range().contains(port);
    Ok(Json(json!({
        "port": port,
        "available": in_range && !in_use,
        "inRange": in_range,
        "inUse": in_use,
    })))
}

async fn used_ports(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let manifest = state.manifest.load().await;
    let ports: Vec<Value> = manifest
        .iter()
        .map(|(name, record)| json!({ "port": record.port, "instance": name }))
        .collect();
    Ok(Json(json!({
        "ports": ports,
        "range": state.manifest.port_range(),
    })))
}
