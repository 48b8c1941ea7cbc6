//! Route handlers for the connector's JSON API (spec §4.5).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{info, warn};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, Result};
use crate::http_client::{authenticated_request, UpstreamResponse};
use crate::upload::{upload_acap as do_upload_acap, upload_license as do_upload_license};
use crate::util::mask_username;
use crate::ConnectorContext;

/// Accept the request when `Origin` is absent only if the TCP peer itself is
/// loopback — `ANAVA_CONNECTOR_LISTEN` can point the connector's socket at a
/// non-loopback interface, so the bind address alone proves nothing about a
/// given connection. A present header MUST match the allow-list regardless
/// of peer address (spec §4.5).
fn check_origin(origin: Option<&HeaderValue>, peer: SocketAddr, allowed: &[String]) -> Result<Option<String>> {
    match origin {
        None if peer.ip().is_loopback() => Ok(None),
        None => Err(ConnectorError::OriginDenied),
        Some(value) => {
            let text = value.to_str().unwrap_or("").to_string();
            if allowed.iter().any(|a| a == &text) {
                Ok(Some(text))
            } else {
                Err(ConnectorError::OriginDenied)
            }
        }
    }
}

/// Origin gate + CORS header injection (spec §4.5), applied to every route.
pub async fn origin_gate(
    State(ctx): State<Arc<ConnectorContext>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let origin_header = request.headers().get(axum::http::header::ORIGIN).cloned();

    let allowed_origin = match check_origin(origin_header.as_ref(), peer, &ctx.config.allowed_origins) {
        Ok(origin) => origin,
        Err(err) => return err.into_response(),
    };

    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    if let Some(origin) = allowed_origin {
        if let Ok(value) = HeaderValue::from_str(&origin) {
            headers.insert(axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
    }
    headers.insert(
        axum::http::header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, GET, OPTIONS"),
    );
    headers.insert(
        axum::http::header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );

    response
}

pub async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    requests_served: u64,
}

pub async fn health(State(ctx): State<Arc<ConnectorContext>>) -> impl IntoResponse {
    let served = ctx.requests_served.fetch_add(1, Ordering::SeqCst);
    Json(HealthBody { status: "ok", requests_served: served })
}

#[derive(Debug, Deserialize)]
struct ProxyRequest {
    url: String,
    method: String,
    username: String,
    password: String,
    #[serde(default)]
    body: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ProxyResponseBody {
    status: u16,
    data: serde_json::Value,
    headers: HashMap<String, String>,
}

fn upstream_to_response_body(upstream: UpstreamResponse) -> ProxyResponseBody {
    let data = serde_json::from_slice(&upstream.body)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&upstream.body).to_string()));
    ProxyResponseBody { status: upstream.status, data, headers: upstream.headers }
}

pub async fn proxy(State(ctx): State<Arc<ConnectorContext>>, Json(req): Json<ProxyRequest>) -> Result<Json<ProxyResponseBody>> {
    let url = Url::parse(&req.url).map_err(|e| ConnectorError::Parse(format!("url: {e}")))?;
    let method: Method = req.method.parse().map_err(|_| ConnectorError::Parse(format!("method: {}", req.method)))?;
    let body_bytes = match &req.body {
        Some(v) => serde_json::to_vec(v).map_err(|e| ConnectorError::Parse(format!("body: {e}")))?,
        None => Vec::new(),
    };

    info!(
        target: "axis_connector::server",
        "proxy {} {} user={} body_bytes={}",
        req.method,
        req.url,
        mask_username(&req.username),
        body_bytes.len()
    );

    let upstream = authenticated_request(
        &ctx.standard_client,
        method,
        &url,
        &req.username,
        &req.password,
        body_bytes,
        "application/json",
    )
    .await?;

    if upstream.status >= 300 {
        warn!(target: "axis_connector::server", "proxy {} {} upstream status={}", req.method, req.url, upstream.status);
    }

    Ok(Json(upstream_to_response_body(upstream)))
}

#[derive(Debug, Deserialize)]
struct UploadAcapRequest {
    url: String,
    username: String,
    password: String,
    #[serde(rename = "acapUrl")]
    acap_url: String,
}

pub async fn upload_acap(
    State(ctx): State<Arc<ConnectorContext>>,
    Json(req): Json<UploadAcapRequest>,
) -> Result<Json<ProxyResponseBody>> {
    let target_url = Url::parse(&req.url).map_err(|e| ConnectorError::Parse(format!("url: {e}")))?;
    let acap_url = Url::parse(&req.acap_url).map_err(|e| ConnectorError::Parse(format!("acapUrl: {e}")))?;

    info!(
        target: "axis_connector::server",
        "upload-acap {} user={}",
        req.url,
        mask_username(&req.username)
    );

    let upstream = do_upload_acap(
        &ctx.standard_client,
        &ctx.upload_client,
        &target_url,
        &req.username,
        &req.password,
        &acap_url,
    )
    .await?;

    if upstream.status >= 300 {
        warn!(target: "axis_connector::server", "upload-acap {} upstream status={}", req.url, upstream.status);
    }

    Ok(Json(upstream_to_response_body(upstream)))
}

#[derive(Debug, Deserialize)]
struct UploadLicenseRequest {
    url: String,
    username: String,
    password: String,
    #[serde(rename = "licenseXML")]
    license_xml: String,
}

pub async fn upload_license(
    State(ctx): State<Arc<ConnectorContext>>,
    Json(req): Json<UploadLicenseRequest>,
) -> Result<Json<ProxyResponseBody>> {
    let target_url = Url::parse(&req.url).map_err(|e| ConnectorError::Parse(format!("url: {e}")))?;

    info!(
        target: "axis_connector::server",
        "upload-license {} user={}",
        req.url,
        mask_username(&req.username)
    );

    let upstream = do_upload_license(&ctx.upload_client, &target_url, &req.username, &req.password, &req.license_xml).await?;

    if upstream.status >= 300 {
        warn!(target: "axis_connector::server", "upload-license {} upstream status={}", req.url, upstream.status);
    }

    Ok(Json(upstream_to_response_body(upstream)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    use crate::config::ConnectorConfig;

    const LOOPBACK: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1)), 51000);
    const REMOTE: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 5)), 51000);

    #[test]
    fn absent_origin_is_allowed_from_loopback_peer() {
        assert_eq!(
            check_origin(None, LOOPBACK, &["https://app.anava.ai".to_string()]).unwrap(),
            None
        );
    }

    #[test]
    fn absent_origin_is_denied_from_non_loopback_peer() {
        let err = check_origin(None, REMOTE, &["https://app.anava.ai".to_string()]).unwrap_err();
        assert_eq!(err.kind(), "origin-denied");
    }

    #[test]
    fn matching_origin_is_allowed_regardless_of_peer() {
        let allowed = vec!["https://app.anava.ai".to_string()];
        let header = HeaderValue::from_static("https://app.anava.ai");
        assert_eq!(
            check_origin(Some(&header), REMOTE, &allowed).unwrap(),
            Some("https://app.anava.ai".to_string())
        );
    }

    #[test]
    fn mismatched_origin_is_denied() {
        let allowed = vec!["https://app.anava.ai".to_string()];
        let header = HeaderValue::from_static("https://evil.example");
        let err = check_origin(Some(&header), LOOPBACK, &allowed).unwrap_err();
        assert_eq!(err.kind(), "origin-denied");
    }

    /// Builds a real `ConnectorContext` against a throwaway cert-store path
    /// so the end-to-end tests below exercise the actual router wiring
    /// (`origin_gate` middleware + `build_router`), not just `check_origin`.
    fn test_context() -> Arc<ConnectorContext> {
        let dir = tempfile::tempdir().unwrap();
        let config = ConnectorConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            allowed_origins: vec!["https://app.anava.ai".to_string()],
            min_firmware: "11.11.0".to_string(),
            cert_store_path: dir.path().join("pins.json"),
            log_file: None,
        };
        ConnectorContext::build(config).unwrap()
    }

    fn router_with_peer(peer: SocketAddr) -> axum::Router {
        crate::server::build_router(test_context()).layer(MockConnectInfo(peer))
    }

    #[tokio::test]
    async fn router_rejects_mismatched_origin_with_403_json_body() {
        let router = router_with_peer(REMOTE);
        let request = HttpRequest::builder()
            .method("GET")
            .uri("/health")
            .header("origin", "https://evil.example")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "origin-denied");
    }

    #[tokio::test]
    async fn router_rejects_absent_origin_from_non_loopback_peer() {
        let router = router_with_peer(REMOTE);
        let request = HttpRequest::builder().method("GET").uri("/health").body(Body::empty()).unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn router_allows_matching_origin_and_sets_cors_headers() {
        let router = router_with_peer(REMOTE);
        let request = HttpRequest::builder()
            .method("GET")
            .uri("/health")
            .header("origin", "https://app.anava.ai")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "https://app.anava.ai"
        );
    }

    #[tokio::test]
    async fn router_allows_absent_origin_from_loopback_peer() {
        let router = router_with_peer(LOOPBACK);
        let request = HttpRequest::builder().method("GET").uri("/health").body(Body::empty()).unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
