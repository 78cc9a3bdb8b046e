//! Callbridge server binary.
//!
//! Starts an axum HTTP server answering telephony webhooks, with structured
//! logging and graceful shutdown on SIGTERM/SIGINT.

use callbridge_conversation::{ConversationEngine, InMemorySessionRegistry, OpenAiChat};
use callbridge_server::artifacts::start_artifact_logger;
use callbridge_server::config::{self, Config};
use callbridge_server::controller::CallFlowController;
use callbridge_server::export::TranscriptExporter;
use callbridge_server::{app, AppState};
use callbridge_voice::{
    DiskArtifactStore, OpenAiTranscriber, OpenAiTts, RecordingRetrievalService,
    SpeechSynthesisPipeline, TwilioRecordingSource,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("CALLBRIDGE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

async fn build_state(config: &Config) -> AppState {
    let store = DiskArtifactStore::open(&config.storage.audio_dir)
        .await
        .expect("failed to create audio directory; check storage.audio_dir in config");
    tokio::spawn(start_artifact_logger(store.subscribe()));

    let tts = OpenAiTts::new(config.speech_api()).expect("failed to build TTS client");
    let transcriber =
        OpenAiTranscriber::new(config.speech_api()).expect("failed to build STT client");
    let chat = OpenAiChat::new(config.chat()).expect("failed to build chat client");
    let recordings = TwilioRecordingSource::new(config.recording_store())
        .expect("failed to build recording client");

    let controller = CallFlowController::new(
        Arc::new(InMemorySessionRegistry::new()),
        ConversationEngine::new(Arc::new(chat)),
        SpeechSynthesisPipeline::new(Arc::new(tts), Arc::new(store), config.voice_profile()),
        RecordingRetrievalService::new(
            Arc::new(recordings),
            Arc::new(transcriber),
            config.retry_policy(),
            config.transcription_language(),
        ),
        TranscriptExporter::new(config.storage.transcripts_dir.clone()),
        config.call_settings(),
    );

    AppState {
        controller: Arc::new(controller),
        public_url: config.server.public_url.clone(),
        audio_dir: config.storage.audio_dir.clone(),
    }
}

#[tokio::main]
async fn main() {
    // A missing .env is normal outside development.
    let dotenv = dotenvy::dotenv();

    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration; the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );
    if let Ok(path) = dotenv {
        tracing::info!(path = %path.display(), "loaded environment file");
    }
    if config.openai.api_key.is_empty() {
        tracing::warn!("openai.api_key is empty; chat, speech and transcription requests will fail");
    }
    if config.server.public_url.is_none() {
        tracing::info!("server.public_url not set; audio URLs will be derived from request headers");
    }

    // Build application
    let state = build_state(&config).await;
    tracing::info!(
        capture_mode = ?config.call.capture_mode,
        poll_attempts = config.recording.poll_attempts,
        "call flow ready"
    );
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting callbridge server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address; is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("callbridge server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
