//! Access to the telephony platform's recording store.

use crate::config::RecordingStoreConfig;
use crate::error::VoiceError;
use crate::stt::MAX_STT_INPUT_BYTES;
use async_trait::async_trait;
use futures_util::StreamExt;

/// Remote store holding call recordings.
///
/// The store is eventually consistent: a reference delivered in a webhook may
/// not be fetchable yet, so callers check availability before downloading.
#[async_trait]
pub trait RecordingSource: Send + Sync {
    /// Lightweight existence check. `Ok(false)` means "not yet"; an `Err` is
    /// a transport failure the caller may treat as a miss.
    async fn is_available(&self, reference: &str) -> Result<bool, VoiceError>;

    /// Downloads the full recording.
    async fn download(&self, reference: &str) -> Result<Vec<u8>, VoiceError>;

    /// File name (with extension) handed to the transcriber for this recording.
    fn file_name(&self, _reference: &str) -> String {
        "recording.wav".to_string()
    }
}

/// Twilio-style recording store over HTTP with optional basic auth.
#[derive(Debug, Clone)]
pub struct TwilioRecordingSource {
    config: RecordingStoreConfig,
    client: reqwest::Client,
}

impl TwilioRecordingSource {
    pub fn new(config: RecordingStoreConfig) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build recording client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn media_url(&self, reference: &str) -> String {
        if self.config.media_suffix.is_empty() || reference.ends_with(&self.config.media_suffix) {
            reference.to_string()
        } else {
            format!("{}{}", reference, self.config.media_suffix)
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.account_sid.is_empty() {
            request
        } else {
            request.basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
        }
    }
}

#[async_trait]
impl RecordingSource for TwilioRecordingSource {
    async fn is_available(&self, reference: &str) -> Result<bool, VoiceError> {
        let response = self
            .authorize(self.client.head(self.media_url(reference)))
            .send()
            .await
            .map_err(|e| VoiceError::Download(format!("availability check failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(%status, reference, "recording not yet available");
        }
        Ok(status.is_success())
    }

    async fn download(&self, reference: &str) -> Result<Vec<u8>, VoiceError> {
        let response = self
            .authorize(self.client.get(self.media_url(reference)))
            .send()
            .await
            .map_err(|e| VoiceError::Download(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VoiceError::Download(format!(
                "recording store returned {}",
                status
            )));
        }

        let mut audio = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| VoiceError::Download(format!("stream interrupted: {}", e)))?;
            if audio.len() + chunk.len() > MAX_STT_INPUT_BYTES {
                return Err(VoiceError::Download(format!(
                    "recording exceeds maximum size of {} bytes",
                    MAX_STT_INPUT_BYTES
                )));
            }
            audio.extend_from_slice(&chunk);
        }

        if audio.is_empty() {
            return Err(VoiceError::Download("recording is empty".to_string()));
        }
        Ok(audio)
    }

    fn file_name(&self, _reference: &str) -> String {
        let extension = self
            .config
            .media_suffix
            .trim_start_matches('.')
            .to_ascii_lowercase();
        match extension.as_str() {
            "mp3" => "recording.mp3".to_string(),
            _ => "recording.wav".to_string(),
        }
    }
}
