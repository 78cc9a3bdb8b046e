//! Voice infrastructure for callbridge.
//!
//! Renders agent utterances to audio artifacts the telephony platform can
//! play (TTS + a write-once artifact store), and turns caller recordings
//! back into text (recording retrieval + STT).
//!
//! External services sit behind narrow traits ([`SpeechSynthesizer`],
//! [`Transcriber`], [`RecordingSource`], [`ArtifactStore`]) so the call flow
//! can be exercised with in-process fakes. The HTTP implementations target
//! OpenAI-compatible speech APIs and a Twilio-style recording store.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod recording;
pub mod retrieval;
pub mod store;
pub mod stt;
pub mod tts;

pub use config::{RecordingStoreConfig, SpeechApiConfig, DEFAULT_API_BASE_URL};
pub use error::VoiceError;
pub use pipeline::SpeechSynthesisPipeline;
pub use recording::{RecordingSource, TwilioRecordingSource};
pub use retrieval::{Backoff, RecordingJob, RecordingRetrievalService, RetryPolicy};
pub use store::{ArtifactCreated, ArtifactStore, AudioArtifact, DiskArtifactStore, AUDIO_ROUTE_PREFIX};
pub use stt::{OpenAiTranscriber, Transcriber};
pub use tts::{OpenAiTts, SpeechSynthesizer};
