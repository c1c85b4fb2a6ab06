pub mod auth;
pub mod backups;
pub mod import;
pub mod instances;
pub mod ports;
pub mod proxy;
pub mod system;
pub mod versions;

use crate::error::AppError;
use crate::models::instance::is_valid_name;
use crate::state::AppState;
use axum::http::{header, Method};
use axum::{middleware, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    let instances = instances::router()
        .merge(backups::router())
        .merge(proxy::router());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .nest("/api/instances", instances)
        .nest("/api/ports", ports::router())
        .nest("/api/versions", versions::router())
        .merge(system::router())
        .merge(import::router())
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_admin))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Instance names from the path become directory names; reject anything else early.
pub(crate) fn checked_name(name: &str) -> Result<&str, AppError> {
    if is_valid_name(name) {
        Ok(name)
    } else {
        Err(AppError::BadRequest("Invalid instance name".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, MonitorSettings};
    use crate::models::health::NotificationEvent;
    use crate::services::health_monitor::{HealthProbe, NotificationSink};
    use crate::services::lifecycle::LifecycleOp;
    use crate::test_support::{write_script, FakeLifecycle};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct DownProbe;

    #[async_trait]
    impl HealthProbe for DownProbe {
        async fn probe(&self, _port: u16) -> bool {
            false
        }
    }

    struct NullSink;

    impl NotificationSink for NullSink {
        fn send(&self, _event: &NotificationEvent) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Harness {
        dir: TempDir,
        lifecycle: Arc<FakeLifecycle>,
        state: Arc<AppState>,
    }

    impl Harness {
        async fn new(admin_token: Option<&str>) -> Self {
            let dir = TempDir::new().unwrap();
            let mut config = AppConfig::rooted_at(dir.path());
            config.admin_token = admin_token.map(str::to_string);
            std::fs::create_dir_all(&config.data_dir).unwrap();
            let lifecycle = Arc::new(FakeLifecycle::new());
            let state = AppState::with_collaborators(
                config,
                MonitorSettings::default(),
                lifecycle.clone(),
                Arc::new(DownProbe),
                Arc::new(NullSink),
            )
            .await
            .unwrap();
            Self {
                dir,
                lifecycle,
                state: Arc::new(state),
            }
        }

        async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
            let resp = create_router(self.state.clone()).oneshot(req).await.unwrap();
            let status = resp.status();
            let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
            (status, json)
        }

        async fn get(&self, uri: &str) -> (StatusCode, Value) {
            self.send(Request::get(uri).body(Body::empty()).unwrap()).await
        }

        async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
            self.send(
                Request::post(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
        }
    }

    #[tokio::test]
    async fn test_create_allocates_port_and_lists_it() {
        let h = Harness::new(None).await;

        let (status, body) = h.post_json("/api/instances", json!({"name": "acme"})).await;
        assert_eq!(status, StatusCode::CREATED);
        let port = body["instance"]["port"].as_u64().unwrap();
        assert!((30000..=39999).contains(&port));
        assert_eq!(body["credentials"]["email"], "admin@acme.local");
        assert_eq!(body["credentials"]["password"], "changeme123");

        let (status, used) = h.get("/api/ports/used").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(used["ports"], json!([{"port": port, "instance": "acme"}]));
        assert_eq!(used["range"], json!({"min": 30000, "max": 39999}));

        let args = h.lifecycle.last_args().unwrap();
        assert!(args.windows(2).any(|w| w[0] == "--port" && w[1] == port.to_string()));

        let (_, listed) = h.get("/api/instances").await;
        assert_eq!(listed["instances"][0]["name"], "acme");
        assert_eq!(listed["instances"][0]["status"], "running");
        assert_eq!(listed["instances"][0]["healthy"], false);
    }

    #[tokio::test]
    async fn test_out_of_range_port_is_rejected_without_side_effects() {
        let h = Harness::new(None).await;

        let (status, body) = h
            .post_json("/api/instances", json!({"name": "acme", "port": 20000}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Port must be between 30000 and 39999");
        assert!(h.state.manifest.load().await.is_empty());
        assert!(h.lifecycle.calls().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_port_and_missing_name() {
        let h = Harness::new(None).await;
        let (status, _) = h
            .post_json("/api/instances", json!({"name": "a", "port": "30005"}))
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = h
            .post_json("/api/instances", json!({"name": "b", "port": 30005}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Port 30005 is already in use");

        let (status, body) = h.post_json("/api/instances", json!({"email": "x@y.z"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Instance name required");
    }

    #[tokio::test]
    async fn test_failed_add_releases_reservation() {
        let h = Harness::new(None).await;
        h.lifecycle.fail(LifecycleOp::Add);

        let (status, body) = h.post_json("/api/instances", json!({"name": "acme"})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "add failed for acme");
        assert!(h.state.manifest.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_proxy_to_unknown_instance_is_404() {
        let h = Harness::new(None).await;
        let (status, body) = h.get("/api/instances/ghost/pb/api/collections").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_proxy_resolves_instance_before_reading_body() {
        let h = Harness::new(None).await;
        let broken = futures_util::stream::iter(vec![Err::<bytes::Bytes, _>(
            std::io::Error::other("client went away"),
        )]);
        let req = Request::post("/api/instances/ghost/pb/api/collections")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from_stream(broken))
            .unwrap();

        let (status, _) = h.send(req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_import_runs_script_with_uploaded_archive() {
        let h = Harness::new(None).await;
        let received = h.dir.path().join("received.zip");
        write_script(
            &h.state.config.scripts_dir,
            "import-instance.sh",
            &format!("[ \"$2\" = acme ] && cp \"$1\" {}", received.display()),
        );

        let req = Request::post("/api/import?name=acme")
            .header(header::CONTENT_TYPE, "application/zip")
            .body(Body::from(&b"PK\x03\x04archive"[..]))
            .unwrap();
        let (status, body) = h.send(req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true, "name": "acme"}));
        assert_eq!(std::fs::read(&received).unwrap(), b"PK\x03\x04archive");

        // The staged upload never outlives the request
        let staged: Vec<_> = std::fs::read_dir(&h.state.config.backups_dir)
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(".import-"))
            .collect();
        assert!(staged.is_empty());
    }

    #[tokio::test]
    async fn test_import_failures() {
        let h = Harness::new(None).await;
        write_script(
            &h.state.config.scripts_dir,
            "import-instance.sh",
            "echo 'Instance acme already exists' >&2; exit 1",
        );

        let upload = |uri: &str| Request::post(uri).body(Body::from(&b"PK"[..])).unwrap();
        let (status, body) = h.send(upload("/api/import")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Name parameter required");

        let (status, _) = h.send(upload("/api/import?name=..")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = h.send(upload("/api/import?name=acme")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Instance acme already exists");
    }

    #[tokio::test]
    async fn test_writes_require_token_when_configured() {
        let h = Harness::new(Some("s3cret")).await;

        let (status, body) = h.post_json("/api/instances", json!({"name": "acme"})).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], auth::UNAUTHORIZED_MSG);

        let wrong = Request::post("/api/instances")
            .header(header::AUTHORIZATION, "Bearer nope")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"name": "acme"}).to_string()))
            .unwrap();
        assert_eq!(h.send(wrong).await.0, StatusCode::UNAUTHORIZED);

        let right = Request::post("/api/instances")
            .header(header::AUTHORIZATION, "bearer s3cret")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"name": "acme"}).to_string()))
            .unwrap();
        assert_eq!(h.send(right).await.0, StatusCode::CREATED);

        // Reads stay open
        assert_eq!(h.get("/api/instances").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_instance_detail_and_lifecycle() {
        let h = Harness::new(None).await;
        h.post_json("/api/instances", json!({"name": "acme", "version": "0.22.0"})).await;

        let (status, _) = h.post_json("/api/instances/acme/stop", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        let (_, detail) = h.get("/api/instances/acme").await;
        assert_eq!(detail["status"], "stopped");
        assert_eq!(detail["version"], "0.22.0");
        assert_eq!(detail["backups"], json!([]));
        assert_eq!(detail["restorePending"], false);

        h.lifecycle.fail(LifecycleOp::Start);
        let (status, body) = h.post_json("/api/instances/acme/start", json!({})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "start failed for acme");
        let (_, detail) = h.get("/api/instances/acme").await;
        assert_eq!(detail["status"], "error");

        let (status, _) = h.get("/api/instances/ghost").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = h.post_json("/api/instances/ghost/start", json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_instance_removes_record_and_data() {
        let h = Harness::new(None).await;
        h.post_json("/api/instances", json!({"name": "acme"})).await;
        let data = h.dir.path().join("data/acme");
        std::fs::create_dir_all(&data).unwrap();

        let resp = h
            .send(Request::delete("/api/instances/acme").body(Body::empty()).unwrap())
            .await;
        assert_eq!(resp.0, StatusCode::OK);
        assert!(h.state.manifest.get("acme").await.is_none());
        assert!(!data.exists());
        assert_eq!(h.lifecycle.last_args().unwrap(), vec!["--delete-data"]);
    }

    #[tokio::test]
    async fn test_backup_routes() {
        let h = Harness::new(None).await;
        h.post_json("/api/instances", json!({"name": "acme"})).await;
        let data = h.dir.path().join("data/acme");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("data.db"), b"rows").unwrap();

        let (status, created) = h.post_json("/api/instances/acme/backups", json!({})).await;
        assert_eq!(status, StatusCode::CREATED);
        let name = created["backup"]["name"].as_str().unwrap().to_string();

        let (_, listed) = h.get("/api/instances/acme/backups").await;
        assert_eq!(listed["backups"][0]["name"], name.as_str());

        let resp = create_router(h.state.clone())
            .oneshot(
                Request::get(format!("/api/instances/acme/backups/{}/download", name))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/zip");
        assert!(resp.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains(&name));
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..2], b"PK");

        let (status, _) = h
            .post_json(&format!("/api/instances/acme/backups/{}/restore", name), json!({}))
            .await;
        assert_eq!(status, StatusCode::OK);

        let delete = |n: String| {
            Request::delete(format!("/api/instances/acme/backups/{}", n))
                .body(Body::empty())
                .unwrap()
        };
        assert_eq!(h.send(delete(name.clone())).await.0, StatusCode::OK);
        assert_eq!(h.send(delete(name)).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_port_check() {
        let h = Harness::new(None).await;
        h.post_json("/api/instances", json!({"name": "acme", "port": 30010})).await;

        let (_, used) = h.get("/api/ports/check/30010").await;
        assert_eq!(
            used,
            json!({"port": 30010, "available": false, "inRange": true, "inUse": true})
        );
        let (_, free) = h.get("/api/ports/check/30011").await;
        assert_eq!(free["available"], true);
        let (_, outside) = h.get("/api/ports/check/80").await;
        assert_eq!(outside["available"], false);
        assert_eq!(outside["inRange"], false);
    }

    #[tokio::test]
    async fn test_invalid_instance_name_in_path() {
        let h = Harness::new(None).await;
        let (status, _) = h.get("/api/instances/..%2Fetc/logs").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
