//! Connector HTTP server (C5): the localhost control-plane axum app.

mod handlers;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::ConnectorContext;

/// Build the connector's axum router. `ctx` is cloned into every handler via
/// `axum::extract::State` (spec §9 "single connector context").
pub fn build_router(ctx: Arc<ConnectorContext>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/proxy", post(handlers::proxy).options(handlers::preflight))
        .route("/upload-acap", post(handlers::upload_acap).options(handlers::preflight))
        .route("/upload-license", post(handlers::upload_license).options(handlers::preflight))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(std::time::Duration::from_secs(
                    crate::config::UPLOAD_TIMEOUT_SECS + 5,
                )))
                .layer(middleware::from_fn_with_state(Arc::clone(&ctx), handlers::origin_gate)),
        )
        .with_state(ctx)
}
