//! Parley server library logic.
//!
//! The server is the session broker for voice calls: it holds the upstream
//! API key and hands clients short-lived credentials.

pub mod api_session;
pub mod config;

use axum::{extract::DefaultBodyLimit, routing::get, Extension, Json, Router};
use config::RealtimeConfig;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// HTTP client for upstream requests.
    pub http: reqwest::Client,
    /// Upstream realtime session settings.
    pub realtime: RealtimeConfig,
}

impl AppState {
    /// Builds the state with an HTTP client bounded by the upstream timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(realtime: RealtimeConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("parley-server/", env!("CARGO_PKG_VERSION")))
            .timeout(realtime.upstream_timeout())
            .build()?;
        Ok(Self { http, realtime })
    }
}

/// Maximum request body size (64 KiB). The broker only serves GETs.
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/session", get(api_session::create_session_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
