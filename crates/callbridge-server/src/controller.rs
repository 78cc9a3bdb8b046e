//! Call-flow state machine.
//!
//! Each inbound webhook is one event for one call. The controller holds the
//! call's guard from the registry for the whole event, decides which state
//! the call is in, drives the collaborators, and answers with the next TwiML
//! document. No failure escapes as an HTTP error: every turn-level failure
//! becomes an apology followed by a redirect back to capture.
//!
//! ```text
//! New -> AwaitingInput -> Processing -> Responding -> AwaitingInput
//!                                                  \-> Ended (status event)
//! ```

use crate::export::TranscriptExporter;
use crate::twiml::{Gather, Record, VoiceResponse};
use callbridge_conversation::{ConversationEngine, ConversationError, SessionRegistry};
use callbridge_types::{CallId, CallStatus, CaptureMode, Turn};
use callbridge_voice::{RecordingRetrievalService, SpeechSynthesisPipeline, VoiceError};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Call start webhook.
pub const VOICE_PATH: &str = "/voice";
/// Capture action: the platform posts recognized speech or a recording here.
pub const INPUT_PATH: &str = "/voice/input";
/// Re-enters capture without greeting again.
pub const LISTEN_PATH: &str = "/voice/listen";
/// Out-of-band call status callbacks.
pub const STATUS_PATH: &str = "/voice/status";

/// Conversation behavior shared by every call.
#[derive(Debug, Clone)]
pub struct CallSettings {
    pub system_prompt: String,
    pub greeting: String,
    pub apology: String,
    pub capture_mode: CaptureMode,
    /// BCP-47 speech recognition language.
    pub language: String,
    pub gather_timeout_secs: u32,
    pub max_recording_secs: u32,
}

/// Caller input carried by a capture event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallInput {
    /// Text recognized by the telephony platform.
    Speech(String),
    /// Reference to a recording that still has to be fetched.
    Recording(String),
}

/// One capture webhook delivery.
#[derive(Debug, Clone)]
pub struct CaptureEvent {
    pub call_id: CallId,
    pub speech: Option<String>,
    pub recording: Option<String>,
}

impl CaptureEvent {
    /// Recognized speech wins over a recording reference. Blank values count
    /// as absent.
    pub fn input(&self) -> Option<CallInput> {
        let present = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        present(&self.speech)
            .map(CallInput::Speech)
            .or_else(|| present(&self.recording).map(CallInput::Recording))
    }
}

/// Lifecycle phase of a call, recorded on log events as `state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    New,
    AwaitingInput,
    Processing,
    Responding,
    Ended,
}

impl CallState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::AwaitingInput => "awaiting_input",
            Self::Processing => "processing",
            Self::Responding => "responding",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a turn could not produce a reply.
#[derive(Debug, Error)]
pub enum TurnFailure {
    #[error("capture event carried no caller input")]
    MissingInput,

    #[error("recording: {0}")]
    Recording(#[from] VoiceError),

    #[error("conversation: {0}")]
    Conversation(#[from] ConversationError),
}

pub struct CallFlowController {
    registry: Arc<dyn SessionRegistry>,
    engine: ConversationEngine,
    speech: SpeechSynthesisPipeline,
    recordings: RecordingRetrievalService,
    exporter: TranscriptExporter,
    settings: CallSettings,
}

impl CallFlowController {
    pub fn new(
        registry: Arc<dyn SessionRegistry>,
        engine: ConversationEngine,
        speech: SpeechSynthesisPipeline,
        recordings: RecordingRetrievalService,
        exporter: TranscriptExporter,
        settings: CallSettings,
    ) -> Self {
        Self {
            registry,
            engine,
            speech,
            recordings,
            exporter,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<dyn SessionRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &CallSettings {
        &self.settings
    }

    /// Handles a call-start or capture-action webhook.
    ///
    /// Without input, an unknown call is greeted and a known call gets the
    /// apology path. With input, the turn is processed; a call that was never
    /// seen or was already destroyed is reinitialized first.
    pub async fn handle_capture(&self, event: CaptureEvent, public_base: &str) -> VoiceResponse {
        let call_id = &event.call_id;
        let _guard = self.registry.acquire(call_id).await;

        let entry = self
            .registry
            .get_or_create(call_id, &self.settings.system_prompt, &self.settings.greeting)
            .await;

        let Some(input) = event.input() else {
            if entry.created {
                return self.greet(call_id, public_base).await;
            }
            return self.fallback(call_id, TurnFailure::MissingInput);
        };

        if entry.created {
            tracing::warn!(
                %call_id,
                state = %CallState::New,
                "input for unknown call, reinitializing session"
            );
        }

        match self
            .take_turn(call_id, &entry.session.transcript, input, public_base)
            .await
        {
            Ok(response) => response,
            Err(failure) => self.fallback(call_id, failure),
        }
    }

    /// Handles a redirect back to capture after silence or an apology.
    pub async fn listen(&self, call_id: &CallId, public_base: &str) -> VoiceResponse {
        let _guard = self.registry.acquire(call_id).await;

        let entry = self
            .registry
            .get_or_create(call_id, &self.settings.system_prompt, &self.settings.greeting)
            .await;
        if entry.created {
            return self.greet(call_id, public_base).await;
        }

        tracing::debug!(%call_id, state = %CallState::AwaitingInput, "listening");
        self.capture(VoiceResponse::new())
    }

    /// Handles an out-of-band call status callback. Terminal statuses export
    /// and destroy the session; anything else is only logged.
    pub async fn handle_status(&self, call_id: &CallId, status: &CallStatus) -> VoiceResponse {
        let _guard = self.registry.acquire(call_id).await;

        if !status.is_terminal() {
            tracing::debug!(%call_id, %status, "call status update");
            return VoiceResponse::new();
        }

        match self.registry.destroy(call_id).await {
            Some(session) => {
                tracing::info!(%call_id, state = %CallState::Ended, %status, "call ended");
                match self.exporter.export(&session, status).await {
                    Ok(Some(path)) => {
                        tracing::info!(%call_id, path = %path.display(), "transcript exported")
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(%call_id, error = %e, "transcript export failed"),
                }
            }
            None => {
                tracing::debug!(%call_id, %status, "terminal status for unknown call");
            }
        }
        VoiceResponse::new()
    }

    async fn greet(&self, call_id: &CallId, public_base: &str) -> VoiceResponse {
        tracing::info!(%call_id, state = %CallState::New, "call started");
        let response = self
            .speak(call_id, VoiceResponse::new(), &self.settings.greeting, public_base)
            .await;
        self.capture(response)
    }

    async fn take_turn(
        &self,
        call_id: &CallId,
        transcript: &[Turn],
        input: CallInput,
        public_base: &str,
    ) -> Result<VoiceResponse, TurnFailure> {
        tracing::info!(%call_id, state = %CallState::Processing, "processing caller input");

        let utterance = match input {
            CallInput::Speech(text) => text,
            CallInput::Recording(reference) => {
                let text = self.recordings.resolve_to_text(&reference).await?;
                if text.trim().is_empty() {
                    return Err(TurnFailure::MissingInput);
                }
                text
            }
        };

        let reply = self.engine.respond(transcript, &utterance).await?;

        self.registry
            .append_turn(call_id, Turn::user(utterance))
            .await?;
        self.registry
            .append_turn(call_id, Turn::assistant(reply.text.clone()))
            .await?;

        tracing::info!(
            %call_id,
            state = %CallState::Responding,
            turns = reply.transcript.len(),
            "replying"
        );
        let response = self
            .speak(call_id, VoiceResponse::new(), &reply.text, public_base)
            .await;
        Ok(self.capture(response))
    }

    /// Plays synthesized audio, or falls back to platform text-to-speech.
    async fn speak(
        &self,
        call_id: &CallId,
        response: VoiceResponse,
        text: &str,
        public_base: &str,
    ) -> VoiceResponse {
        match self.speech.synthesize(text).await {
            Ok(artifact) => {
                tracing::debug!(%call_id, artifact_id = %artifact.id, "synthesized utterance");
                response.play(artifact.url(public_base))
            }
            Err(e) => {
                tracing::warn!(%call_id, error = %e, "speech synthesis failed, using <Say>");
                response.say(text)
            }
        }
    }

    fn capture(&self, response: VoiceResponse) -> VoiceResponse {
        match self.settings.capture_mode {
            CaptureMode::Speech => response
                .gather(Gather {
                    action: INPUT_PATH.to_string(),
                    timeout_secs: self.settings.gather_timeout_secs,
                    language: self.settings.language.clone(),
                })
                .redirect(LISTEN_PATH),
            // An empty recording skips the action and falls through to the
            // redirect, so silence loops back to capture instead of hanging up.
            CaptureMode::Recording => response
                .record(Record {
                    action: INPUT_PATH.to_string(),
                    max_length_secs: self.settings.max_recording_secs,
                    timeout_secs: self.settings.gather_timeout_secs,
                    play_beep: false,
                })
                .redirect(LISTEN_PATH),
        }
    }

    fn fallback(&self, call_id: &CallId, failure: TurnFailure) -> VoiceResponse {
        match &failure {
            TurnFailure::MissingInput => {
                tracing::info!(%call_id, state = %CallState::AwaitingInput, "no caller input")
            }
            other => tracing::warn!(%call_id, error = %other, "turn failed, apologizing"),
        }
        VoiceResponse::new()
            .say(&self.settings.apology)
            .redirect(LISTEN_PATH)
    }
}

impl fmt::Debug for CallFlowController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallFlowController")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
