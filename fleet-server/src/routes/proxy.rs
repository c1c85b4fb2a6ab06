use crate::error::AppError;
use crate::routes::checked_name;
use crate::services::proxy::ProxyError;
use crate::state::AppState;
use axum::extract::{Path, Request, State};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use std::sync::Arc;

/// Upper bound on buffered request bodies forwarded to an instance.
const MAX_PROXY_BODY: usize = 64 * 1024 * 1024;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/{name}/pb/{*path}", any(proxy_to_instance))
}

async fn proxy_to_instance(
    State(state): State<Arc<AppState>>,
    Path((name, path)): Path<(String, String)>,
    req: Request,
) -> Result<Response, AppError> {
    let name = checked_name(&name)?;
    if state.manifest.get(name).await.is_none() {
        return Err(ProxyError::NotFound(name.to_string()).into());
    }

    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, MAX_PROXY_BODY)
        .await
        .map_err(|_| AppError::BadRequest("Request body too large".into()))?;

    let resp = state
        .proxy
        .forward(name, parts.method, &path, parts.uri.query(), &parts.headers, body)
        .await?;
    Ok(resp)
}
