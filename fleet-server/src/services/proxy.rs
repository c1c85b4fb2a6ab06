//! Forwards tenant-scoped requests to the owning instance's local port.

use crate::services::manifest_store::ManifestStore;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method};
use axum::response::Response;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error("Instance {0} not found")]
    NotFound(String),

    #[error("upstream unavailable")]
    Unavailable,
}

pub struct ProxyRouter {
    manifest: Arc<ManifestStore>,
    client: reqwest::Client,
}

impl ProxyRouter {
    pub fn new(manifest: Arc<ManifestStore>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { manifest, client })
    }

    /// Forward one request to `http://127.0.0.1:<port>/<path>[?query]`.
    ///
    /// Only the body (for methods that carry one), `Authorization` and
    /// `Content-Type` are forwarded. The upstream status, content type and body
    /// come back verbatim; the body is streamed.
    pub async fn forward(
        &self,
        instance: &str,
        method: Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response, ProxyError> {
        let record = self
            .manifest
            .get(instance)
            .await
            .ok_or_else(|| ProxyError::NotFound(instance.to_string()))?;

        let mut url = format!("http://127.0.0.1:{}/{}", record.port, path.trim_start_matches('/'));
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(q);
        }

        let mut request = self.client.request(method.clone(), &url);
        if let Some(auth) = headers.get(AUTHORIZATION) {
            request = request.header(AUTHORIZATION, auth.clone());
        }
        if let Some(ct) = headers.get(CONTENT_TYPE) {
            request = request.header(CONTENT_TYPE, ct.clone());
        }
        if carries_body(&method) {
            request = request.body(body);
        }

        let upstream = request.send().await.map_err(|e| {
            tracing::warn!(instance, method = %method, path, error = %e, "Proxy request failed");
            ProxyError::Unavailable
        })?;

        let content_type = upstream
            .headers()
            .get(CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("application/json"));

        Response::builder()
            .status(upstream.status())
            .header(CONTENT_TYPE, content_type)
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| {
                tracing::error!(instance, error = %e, "Failed to build proxied response");
                ProxyError::Unavailable
            })
    }
}

fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortRange;
    use axum::extract::Request;
    use axum::http::StatusCode;
    use axum::routing::{any, get};
    use axum::Router;
    use tempfile::TempDir;

    async fn serve(app: Router) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    async fn router_with(dir: &TempDir, instance: &str, port: u16) -> ProxyRouter {
        let manifest = Arc::new(ManifestStore::new(
            dir.path().join("instances.json"),
            PortRange { min: 1, max: u16::MAX },
        ));
        manifest.insert_new(instance, Some(port), None, None).await.unwrap();
        ProxyRouter::new(manifest, Duration::from_secs(5)).unwrap()
    }

    async fn read_body(resp: Response) -> Bytes {
        axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap()
    }

    #[tokio::test]
    async fn test_unknown_instance_is_not_found() {
        let dir = TempDir::new().unwrap();
        let router = router_with(&dir, "acme", 30000).await;
        let err = router
            .forward("ghost", Method::GET, "api/health", None, &HeaderMap::new(), Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::NotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn test_forwards_method_path_auth_and_body() {
        let upstream = Router::new().route(
            "/api/collections/posts/records",
            any(|req: Request| async move {
                let (parts, body) = req.into_parts();
                let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
                let echo = serde_json::json!({
                    "method": parts.method.as_str(),
                    "query": parts.uri.query(),
                    "auth": parts.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()),
                    "contentType": parts.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
                    "body": String::from_utf8_lossy(&body),
                });
                (StatusCode::CREATED, axum::Json(echo))
            }),
        );
        let port = serve(upstream).await;
        let dir = TempDir::new().unwrap();
        let router = router_with(&dir, "acme", port).await;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tenant-token"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-internal", HeaderValue::from_static("dropped"));

        let resp = router
            .forward(
                "acme",
                Method::POST,
                "/api/collections/posts/records",
                Some("expand=author"),
                &headers,
                Bytes::from_static(br#"{"title":"hello"}"#),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(resp.headers()[CONTENT_TYPE], "application/json");
        let echo: serde_json::Value = serde_json::from_slice(&read_body(resp).await).unwrap();
        assert_eq!(echo["method"], "POST");
        assert_eq!(echo["query"], "expand=author");
        assert_eq!(echo["auth"], "Bearer tenant-token");
        assert_eq!(echo["contentType"], "application/json");
        assert_eq!(echo["body"], r#"{"title":"hello"}"#);
    }

    #[tokio::test]
    async fn test_get_drops_body_and_keeps_upstream_status() {
        let upstream = Router::new().route(
            "/missing",
            get(|body: Bytes| async move {
                assert!(body.is_empty());
                (StatusCode::NOT_FOUND, [(CONTENT_TYPE, "text/plain")], "nope")
            }),
        );
        let port = serve(upstream).await;
        let dir = TempDir::new().unwrap();
        let router = router_with(&dir, "acme", port).await;

        let resp = router
            .forward(
                "acme",
                Method::GET,
                "missing",
                None,
                &HeaderMap::new(),
                Bytes::from_static(b"ignored"),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(read_body(resp).await, Bytes::from_static(b"nope"));
    }

    #[tokio::test]
    async fn test_missing_content_type_defaults_to_json() {
        let upstream = Router::new().route(
            "/raw",
            get(|| async { Response::new(Body::from("{}")) }),
        );
        let port = serve(upstream).await;
        let dir = TempDir::new().unwrap();
        let router = router_with(&dir, "acme", port).await;

        let resp = router
            .forward("acme", Method::GET, "raw", None, &HeaderMap::new(), Bytes::new())
            .await
            .unwrap();
        assert_eq!(resp.headers()[CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn test_dead_upstream_is_unavailable() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let dir = TempDir::new().unwrap();
        let router = router_with(&dir, "acme", port).await;

        let err = router
            .forward("acme", Method::GET, "api/health", None, &HeaderMap::new(), Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Unavailable));
        assert_eq!(err.to_string(), "upstream unavailable");
    }

    #[tokio::test]
    async fn test_timeout_is_unavailable() {
        let upstream = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let port = serve(upstream).await;
        let dir = TempDir::new().unwrap();
        let manifest = Arc::new(ManifestStore::new(
            dir.path().join("instances.json"),
            PortRange { min: 1, max: u16::MAX },
        ));
        manifest.insert_new("acme", Some(port), None, None).await.unwrap();
        let router = ProxyRouter::new(manifest, Duration::from_millis(300)).unwrap();

        let err = router
            .forward("acme", Method::GET, "slow", None, &HeaderMap::new(), Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Unavailable));
    }
}
