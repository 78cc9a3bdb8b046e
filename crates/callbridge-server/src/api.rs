//! Telephony webhook handlers.
//!
//! Requests are form-encoded with the platform's field names. Responses are
//! always TwiML; a missing `CallSid` is the only request that is rejected
//! (by the form extractor).

use crate::controller::CaptureEvent;
use crate::twiml::VoiceResponse;
use crate::AppState;
use axum::{
    extract::{Extension, Form},
    http::{header, HeaderMap},
};
use callbridge_types::{CallId, CallStatus};
use serde::Deserialize;
use std::sync::Arc;

/// Fields of a call-start, capture-action, or listen webhook.
#[derive(Debug, Deserialize)]
pub struct VoiceWebhook {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "SpeechResult", default)]
    pub speech_result: Option<String>,
    #[serde(rename = "RecordingUrl", default)]
    pub recording_url: Option<String>,
}

/// Fields of a call status callback.
#[derive(Debug, Deserialize)]
pub struct StatusWebhook {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "CallStatus", default)]
    pub call_status: String,
}

/// Base URL the platform can fetch audio from.
///
/// Uses the configured public URL when present, otherwise rebuilds it from
/// the request's `X-Forwarded-Proto` and `Host` headers.
pub fn public_base(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(url) = &state.public_url {
        return url.trim_end_matches('/').to_string();
    }

    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{}://{}", proto, host)
}

/// Handler for `POST /voice` and `POST /voice/input`.
pub async fn capture_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Form(payload): Form<VoiceWebhook>,
) -> VoiceResponse {
    let base = public_base(&state, &headers);
    let event = CaptureEvent {
        call_id: CallId::new(payload.call_sid),
        speech: payload.speech_result,
        recording: payload.recording_url,
    };
    state.controller.handle_capture(event, &base).await
}

/// Handler for `POST /voice/listen`.
pub async fn listen_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Form(payload): Form<VoiceWebhook>,
) -> VoiceResponse {
    let base = public_base(&state, &headers);
    state
        .controller
        .listen(&CallId::new(payload.call_sid), &base)
        .await
}

/// Handler for `POST /voice/status`.
pub async fn status_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(payload): Form<StatusWebhook>,
) -> VoiceResponse {
    let status = CallStatus::parse(&payload.call_status);
    state
        .controller
        .handle_status(&CallId::new(payload.call_sid), &status)
        .await
}
