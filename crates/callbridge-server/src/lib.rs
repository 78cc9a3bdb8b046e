//! Callbridge server library logic.
//!
//! Wires the telephony webhooks to the [`controller::CallFlowController`] and
//! serves synthesized audio back to the platform.

pub mod api;
pub mod artifacts;
pub mod config;
pub mod controller;
pub mod export;
pub mod twiml;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use callbridge_voice::AUDIO_ROUTE_PREFIX;
use controller::{CallFlowController, INPUT_PATH, LISTEN_PATH, STATUS_PATH, VOICE_PATH};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Debug)]
pub struct AppState {
    /// Call-flow state machine.
    pub controller: Arc<CallFlowController>,
    /// Configured external base URL, if any.
    pub public_url: Option<String>,
    /// Directory holding synthesized audio artifacts.
    pub audio_dir: PathBuf,
}

/// Maximum request body size (64 KiB). Webhook forms are small.
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Legacy alias for the call start webhook.
const LEGACY_VOICE_PATH: &str = "/twilio-webhook";

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_calls": state.controller.registry().active_calls().await,
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    tracing::info!(path = %state.audio_dir.display(), "serving audio artifacts at {}", AUDIO_ROUTE_PREFIX);
    let audio = ServeDir::new(&state.audio_dir);

    Router::new()
        .route("/health", get(health))
        .route(VOICE_PATH, post(api::capture_handler))
        .route(LEGACY_VOICE_PATH, post(api::capture_handler))
        .route(INPUT_PATH, post(api::capture_handler))
        .route(LISTEN_PATH, post(api::listen_handler))
        .route(STATUS_PATH, post(api::status_handler))
        .nest_service(AUDIO_ROUTE_PREFIX, audio)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
