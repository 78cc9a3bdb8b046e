//! End-to-end call flows through the router with in-process collaborators.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use callbridge_conversation::{
    ChatCompletion, ConversationEngine, ConversationError, InMemorySessionRegistry,
    SessionRegistry,
};
use callbridge_server::controller::{CallFlowController, CallSettings};
use callbridge_server::export::TranscriptExporter;
use callbridge_server::{app, AppState};
use callbridge_types::{CallId, CaptureMode, Turn, VoiceProfile};
use callbridge_voice::{
    DiskArtifactStore, RecordingRetrievalService, RecordingSource, RetryPolicy,
    SpeechSynthesisPipeline, SpeechSynthesizer, Transcriber, VoiceError,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

const PROMPT: &str = "You take print orders.";
const GREETING: &str = "Hi, what would you like to print?";
const APOLOGY: &str = "Sorry, please say that again.";
const REPLY: &str = "What size should the posters be?";

// ---------- fakes ----------

enum ChatScript {
    Reply(&'static str),
    Fail,
}

struct FakeChat {
    script: ChatScript,
    seen: Mutex<Vec<Vec<Turn>>>,
}

#[async_trait]
impl ChatCompletion for FakeChat {
    async fn complete(&self, turns: &[Turn]) -> Result<Option<String>, ConversationError> {
        self.seen.lock().unwrap().push(turns.to_vec());
        // Suspend like a real network call so overlapping events interleave here.
        tokio::task::yield_now().await;
        match self.script {
            ChatScript::Reply(text) => Ok(Some(text.to_string())),
            ChatScript::Fail => Err(ConversationError::Upstream("HTTP 503".into())),
        }
    }
}

struct FakeTts {
    fail: bool,
}

#[async_trait]
impl SpeechSynthesizer for FakeTts {
    async fn synthesize(&self, text: &str, _profile: &VoiceProfile) -> Result<Vec<u8>, VoiceError> {
        if self.fail {
            return Err(VoiceError::Synthesis("voice service down".into()));
        }
        Ok(format!("AUDIO:{}", text).into_bytes())
    }
}

#[derive(Default)]
struct FakeRecordings {
    available: bool,
    checks: AtomicU32,
    downloads: AtomicU32,
}

#[async_trait]
impl RecordingSource for FakeRecordings {
    async fn is_available(&self, _reference: &str) -> Result<bool, VoiceError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.available)
    }

    async fn download(&self, _reference: &str) -> Result<Vec<u8>, VoiceError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(b"RIFF....WAVE".to_vec())
    }
}

struct FakeTranscriber {
    text: &'static str,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(
        &self,
        _audio: Vec<u8>,
        _file_name: &str,
        _language: &str,
    ) -> Result<String, VoiceError> {
        Ok(self.text.to_string())
    }
}

// ---------- harness ----------

struct Options {
    chat: ChatScript,
    tts_fails: bool,
    recording_available: bool,
    transcription: &'static str,
    capture_mode: CaptureMode,
    export_transcripts: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            chat: ChatScript::Reply(REPLY),
            tts_fails: false,
            recording_available: true,
            transcription: "I need fifty flyers",
            capture_mode: CaptureMode::Speech,
            export_transcripts: false,
        }
    }
}

struct Harness {
    router: Router,
    registry: Arc<InMemorySessionRegistry>,
    chat: Arc<FakeChat>,
    recordings: Arc<FakeRecordings>,
    dir: TempDir,
}

impl Harness {
    async fn new(options: Options) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let audio_dir = dir.path().join("audio");
        let store = DiskArtifactStore::open(&audio_dir).await.unwrap();

        let registry = Arc::new(InMemorySessionRegistry::new());
        let chat = Arc::new(FakeChat {
            script: options.chat,
            seen: Mutex::new(Vec::new()),
        });
        let recordings = Arc::new(FakeRecordings {
            available: options.recording_available,
            ..FakeRecordings::default()
        });

        let controller = CallFlowController::new(
            registry.clone(),
            ConversationEngine::new(chat.clone()),
            SpeechSynthesisPipeline::new(
                Arc::new(FakeTts {
                    fail: options.tts_fails,
                }),
                Arc::new(store),
                VoiceProfile::default(),
            ),
            RecordingRetrievalService::new(
                recordings.clone(),
                Arc::new(FakeTranscriber {
                    text: options.transcription,
                }),
                RetryPolicy::default(),
                "en",
            ),
            TranscriptExporter::new(
                options
                    .export_transcripts
                    .then(|| dir.path().join("transcripts")),
            ),
            CallSettings {
                system_prompt: PROMPT.into(),
                greeting: GREETING.into(),
                apology: APOLOGY.into(),
                capture_mode: options.capture_mode,
                language: "en-US".into(),
                gather_timeout_secs: 5,
                max_recording_secs: 30,
            },
        );

        let router = app(AppState {
            controller: Arc::new(controller),
            public_url: None,
            audio_dir,
        });

        Self {
            router,
            registry,
            chat,
            recordings,
            dir,
        }
    }

    async fn post(&self, path: &str, form: &str) -> (StatusCode, String, Option<String>) {
        let response = self
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(path)
                    .header(header::HOST, "calls.test")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(form.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap(), content_type)
    }

    async fn twiml(&self, path: &str, form: &str) -> String {
        let (status, body, content_type) = self.post(path, form).await;
        assert_eq!(status, StatusCode::OK, "body: {}", body);
        assert_eq!(content_type.as_deref(), Some("text/xml"));
        body
    }

    async fn transcript(&self, call: &str) -> Vec<Turn> {
        self.registry.snapshot(&CallId::from(call)).await.unwrap()
    }
}

fn seeded() -> Vec<Turn> {
    vec![Turn::system(PROMPT), Turn::assistant(GREETING)]
}

fn played_url(twiml: &str) -> &str {
    let start = twiml.find("<Play>").expect("expected a <Play> verb") + "<Play>".len();
    let end = twiml[start..].find("</Play>").unwrap() + start;
    &twiml[start..end]
}

const GATHER: &str = r#"<Gather input="speech" action="/voice/input" method="POST" timeout="5" speechTimeout="auto" language="en-US"/>"#;
const LISTEN_REDIRECT: &str = r#"<Redirect method="POST">/voice/listen</Redirect>"#;

fn apology_twiml() -> String {
    format!("<Response><Say>{}</Say>{}</Response>", APOLOGY, LISTEN_REDIRECT)
}

// ---------- scenarios ----------

#[tokio::test]
async fn test_new_call_is_greeted_with_audio_and_capture() {
    let h = Harness::new(Options::default()).await;

    let body = h.twiml("/voice", "CallSid=CA1").await;

    let url = played_url(&body);
    assert!(url.starts_with("http://calls.test/audio/"), "url: {}", url);
    assert!(url.ends_with(".mp3"));
    assert!(body.contains(&format!("</Play>{}{}</Response>", GATHER, LISTEN_REDIRECT)));
    assert_eq!(h.transcript("CA1").await, seeded());

    let files = std::fs::read_dir(h.dir.path().join("audio")).unwrap().count();
    assert_eq!(files, 1);
}

#[tokio::test]
async fn test_greeting_audio_is_served() {
    let h = Harness::new(Options::default()).await;
    let body = h.twiml("/voice", "CallSid=CA1").await;
    let path = played_url(&body).trim_start_matches("http://calls.test").to_string();

    let response = h
        .router
        .clone()
        .oneshot(Request::builder().uri(&path).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], format!("AUDIO:{}", GREETING).as_bytes());
}

#[tokio::test]
async fn test_speech_turn_appends_user_then_assistant() {
    let h = Harness::new(Options::default()).await;
    h.twiml("/voice", "CallSid=CA1").await;

    let body = h
        .twiml("/voice/input", "CallSid=CA1&SpeechResult=I+want+50+posters")
        .await;

    assert!(played_url(&body).starts_with("http://calls.test/audio/"));
    assert!(body.contains(GATHER));
    assert_eq!(
        h.transcript("CA1").await,
        vec![
            Turn::system(PROMPT),
            Turn::assistant(GREETING),
            Turn::user("I want 50 posters"),
            Turn::assistant(REPLY),
        ]
    );

    let seen = h.chat.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(
        seen[0],
        vec![
            Turn::system(PROMPT),
            Turn::assistant(GREETING),
            Turn::user("I want 50 posters"),
        ]
    );
}

#[tokio::test]
async fn test_missing_input_apologizes_and_keeps_transcript() {
    let h = Harness::new(Options::default()).await;
    h.twiml("/voice", "CallSid=CA1").await;
    h.twiml("/voice/input", "CallSid=CA1&SpeechResult=I+want+50+posters")
        .await;

    let body = h.twiml("/voice/input", "CallSid=CA1&SpeechResult=").await;

    assert!(body.ends_with(&apology_twiml()), "body: {}", body);
    assert_eq!(h.transcript("CA1").await.len(), 4);
    assert_eq!(h.chat.seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_completed_status_destroys_session() {
    let h = Harness::new(Options::default()).await;
    h.twiml("/voice", "CallSid=CA1").await;
    h.twiml("/voice", "CallSid=CA2").await;

    let body = h
        .twiml("/voice/status", "CallSid=CA1&CallStatus=completed")
        .await;

    assert!(body.ends_with("<Response/>"));
    assert!(matches!(
        h.registry.snapshot(&CallId::from("CA1")).await,
        Err(ConversationError::SessionNotFound(_))
    ));
    assert_eq!(h.registry.active_calls().await, 1);
}

#[tokio::test]
async fn test_non_terminal_status_keeps_session() {
    let h = Harness::new(Options::default()).await;
    h.twiml("/voice", "CallSid=CA1").await;

    h.twiml("/voice/status", "CallSid=CA1&CallStatus=in-progress")
        .await;

    assert_eq!(h.transcript("CA1").await, seeded());
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_recording_apologizes_without_download() {
    let h = Harness::new(Options {
        recording_available: false,
        capture_mode: CaptureMode::Recording,
        ..Options::default()
    })
    .await;
    h.twiml("/voice", "CallSid=CA1").await;

    let body = h
        .twiml(
            "/voice/input",
            "CallSid=CA1&RecordingUrl=https%3A%2F%2Fapi.twilio.com%2FRE1",
        )
        .await;

    assert!(body.ends_with(&apology_twiml()), "body: {}", body);
    assert_eq!(h.recordings.checks.load(Ordering::SeqCst), 20);
    assert_eq!(h.recordings.downloads.load(Ordering::SeqCst), 0);
    assert_eq!(h.transcript("CA1").await, seeded());
    assert!(h.chat.seen.lock().unwrap().is_empty());
}

// ---------- failure paths and policies ----------

#[tokio::test]
async fn test_recording_turn_is_transcribed() {
    let h = Harness::new(Options {
        capture_mode: CaptureMode::Recording,
        ..Options::default()
    })
    .await;

    let greeting = h.twiml("/voice", "CallSid=CA1").await;
    assert!(greeting.contains(
        r#"<Record action="/voice/input" method="POST" maxLength="30" timeout="5" playBeep="false"/><Redirect method="POST">/voice/listen</Redirect></Response>"#
    ));

    let body = h
        .twiml("/voice/input", "CallSid=CA1&RecordingUrl=https%3A%2F%2Fr%2FRE1")
        .await;

    assert!(body.contains("<Record "));
    assert_eq!(h.recordings.checks.load(Ordering::SeqCst), 1);
    assert_eq!(h.recordings.downloads.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.transcript("CA1").await[2..],
        [Turn::user("I need fifty flyers"), Turn::assistant(REPLY)]
    );
}

#[tokio::test]
async fn test_blank_transcription_counts_as_missing_input() {
    let h = Harness::new(Options {
        capture_mode: CaptureMode::Recording,
        transcription: "   ",
        ..Options::default()
    })
    .await;
    h.twiml("/voice", "CallSid=CA1").await;

    let body = h
        .twiml("/voice/input", "CallSid=CA1&RecordingUrl=https%3A%2F%2Fr%2FRE1")
        .await;

    assert!(body.ends_with(&apology_twiml()));
    assert_eq!(h.transcript("CA1").await, seeded());
}

#[tokio::test]
async fn test_synthesis_failure_falls_back_to_say() {
    let h = Harness::new(Options {
        tts_fails: true,
        ..Options::default()
    })
    .await;

    let greeting = h.twiml("/voice", "CallSid=CA1").await;
    assert!(greeting.contains(&format!("<Response><Say>{}</Say>{}", GREETING, GATHER)));
    assert!(!greeting.contains("<Play>"));

    let reply = h
        .twiml("/voice/input", "CallSid=CA1&SpeechResult=hello")
        .await;
    assert!(reply.contains(&format!("<Say>{}</Say>", REPLY)));
    assert_eq!(h.transcript("CA1").await.len(), 4);
    assert_eq!(std::fs::read_dir(h.dir.path().join("audio")).unwrap().count(), 0);
}

#[tokio::test]
async fn test_chat_failure_apologizes_without_mutation() {
    let h = Harness::new(Options {
        chat: ChatScript::Fail,
        ..Options::default()
    })
    .await;
    h.twiml("/voice", "CallSid=CA1").await;

    let body = h
        .twiml("/voice/input", "CallSid=CA1&SpeechResult=hello")
        .await;

    assert!(body.ends_with(&apology_twiml()));
    assert_eq!(h.transcript("CA1").await, seeded());
}

#[tokio::test]
async fn test_input_after_destroy_reinitializes_session() {
    let h = Harness::new(Options::default()).await;
    h.twiml("/voice", "CallSid=CA1").await;
    h.twiml("/voice/status", "CallSid=CA1&CallStatus=completed")
        .await;

    let body = h
        .twiml("/voice/input", "CallSid=CA1&SpeechResult=are+you+there")
        .await;

    assert!(body.contains("<Play>"));
    assert_eq!(
        h.transcript("CA1").await,
        vec![
            Turn::system(PROMPT),
            Turn::assistant(GREETING),
            Turn::user("are you there"),
            Turn::assistant(REPLY),
        ]
    );
}

#[tokio::test]
async fn test_listen_recaptures_without_greeting() {
    let h = Harness::new(Options::default()).await;
    h.twiml("/voice", "CallSid=CA1").await;

    let body = h.twiml("/voice/listen", "CallSid=CA1").await;

    assert!(body.ends_with(&format!("<Response>{}{}</Response>", GATHER, LISTEN_REDIRECT)));
    assert_eq!(std::fs::read_dir(h.dir.path().join("audio")).unwrap().count(), 1);
    assert_eq!(h.transcript("CA1").await, seeded());
}

#[tokio::test]
async fn test_listen_for_unknown_call_greets() {
    let h = Harness::new(Options::default()).await;

    let body = h.twiml("/voice/listen", "CallSid=CA9").await;

    assert!(body.contains("<Play>"));
    assert_eq!(h.transcript("CA9").await, seeded());
}

#[tokio::test]
async fn test_legacy_webhook_path_greets() {
    let h = Harness::new(Options::default()).await;
    let body = h.twiml("/twilio-webhook", "CallSid=CA1").await;
    assert!(body.contains(GATHER));
}

#[tokio::test]
async fn test_missing_call_sid_is_rejected() {
    let h = Harness::new(Options::default()).await;
    let (status, _, _) = h.post("/voice", "SpeechResult=hello").await;
    assert!(status.is_client_error());
    assert_eq!(h.registry.active_calls().await, 0);
}

#[tokio::test]
async fn test_overlapping_events_for_one_call_are_serialized() {
    let h = Arc::new(Harness::new(Options::default()).await);
    h.twiml("/voice", "CallSid=CA1").await;

    let mut handles = Vec::new();
    for i in 0..4 {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            h.twiml("/voice/input", &format!("CallSid=CA1&SpeechResult=order+{}", i))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let transcript = h.transcript("CA1").await;
    assert_eq!(transcript.len(), 2 + 4 * 2);
    for pair in transcript[2..].chunks(2) {
        assert_eq!(pair[0].role, callbridge_types::Role::User);
        assert_eq!(pair[1], Turn::assistant(REPLY));
    }

    // Every completion saw the previous turn committed.
    let seen = h.chat.seen.lock().unwrap();
    let lengths: Vec<usize> = seen.iter().map(Vec::len).collect();
    assert_eq!(lengths, vec![3, 5, 7, 9]);
}

#[tokio::test]
async fn test_transcript_exported_on_completion() {
    let h = Harness::new(Options {
        export_transcripts: true,
        ..Options::default()
    })
    .await;
    h.twiml("/voice", "CallSid=CA1").await;
    h.twiml("/voice/input", "CallSid=CA1&SpeechResult=hello")
        .await;

    h.twiml("/voice/status", "CallSid=CA1&CallStatus=completed")
        .await;

    let path = h.dir.path().join("transcripts").join("CA1.json");
    let json: serde_json::Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
    assert_eq!(json["status"], "completed");
    assert_eq!(json["turns"].as_array().unwrap().len(), 4);
    assert_eq!(json["turns"][0]["role"], "system");
}

#[tokio::test]
async fn test_health_reports_active_calls() {
    let h = Harness::new(Options::default()).await;
    h.twiml("/voice", "CallSid=CA1").await;

    let response = h
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["active_calls"], 1);
}
