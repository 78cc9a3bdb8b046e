use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("TTS error: {0}")]
    Synthesis(String),

    #[error("Artifact storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Recording {reference} unavailable after {attempts} checks")]
    RecordingUnavailable { reference: String, attempts: u32 },

    #[error("Recording download error: {0}")]
    Download(String),

    #[error("STT error: {0}")]
    Transcription(String),
}
