use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::services::backup_manager::BackupError;
use crate::services::importer::ImportError;
use crate::services::manifest_store::ManifestError;
use crate::services::proxy::ProxyError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    /// External script or operation failure; the diagnostic is returned verbatim.
    #[error("{0}")]
    Script(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            AppError::BadGateway(m) => (StatusCode::BAD_GATEWAY, m.clone()),
            AppError::ServiceUnavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            AppError::Script(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}

impl From<ManifestError> for AppError {
    fn from(e: ManifestError) -> Self {
        match e {
            ManifestError::NotFound(_) => AppError::NotFound(e.to_string()),
            ManifestError::AlreadyExists(_) => AppError::Conflict(e.to_string()),
            ManifestError::InvalidName
            | ManifestError::InvalidPort
            | ManifestError::PortOutOfRange(_)
            | ManifestError::PortInUse(_) => AppError::BadRequest(e.to_string()),
            ManifestError::PortsExhausted(_) => AppError::ServiceUnavailable(e.to_string()),
            ManifestError::Persist(inner) => AppError::Internal(inner),
        }
    }
}

impl From<BackupError> for AppError {
    fn from(e: BackupError) -> Self {
        match e {
            BackupError::NotFound => AppError::NotFound(e.to_string()),
            BackupError::InstanceDataMissing(_) => AppError::NotFound(e.to_string()),
            BackupError::InvalidName => AppError::BadRequest(e.to_string()),
            BackupError::Archive(_) | BackupError::RestoreFailed { .. } => {
                AppError::Script(e.to_string())
            }
            BackupError::Io(inner) => AppError::Internal(inner.into()),
        }
    }
}

impl From<ImportError> for AppError {
    fn from(e: ImportError) -> Self {
        match e {
            ImportError::Upload(_) => AppError::BadRequest(e.to_string()),
            ImportError::Script(msg) => AppError::Script(msg),
            ImportError::Io(inner) => AppError::Internal(inner.into()),
        }
    }
}

impl From<ProxyError> for AppError {
    fn from(e: ProxyError) -> Self {
        match e {
            ProxyError::NotFound(_) => AppError::NotFound(e.to_string()),
            ProxyError::Unavailable => AppError::BadGateway(e.to_string()),
        }
    }
}
