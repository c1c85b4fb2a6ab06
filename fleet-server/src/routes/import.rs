use crate::error::AppError;
use crate::routes::checked_name;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/import", post(import_instance))
}

#[derive(Debug, Deserialize)]
struct ImportQuery {
    name: Option<String>,
}

/// The request body is the raw zip archive.
async fn import_instance(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ImportQuery>,
    body: Body,
) -> Result<Json<Value>, AppError> {
    let name = query.name.as_deref().map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(AppError::BadRequest("Name parameter required".into()));
    }
    let name = checked_name(name)?;

    state.importer.import(name, body.into_data_stream()).await?;
    Ok(Json(json!({ "success": true, "name": name })))
}
