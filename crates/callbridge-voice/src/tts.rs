use crate::config::SpeechApiConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use callbridge_types::voice::VoiceProfile;
use serde::Serialize;

/// Maximum text input size for TTS (4 KiB). The speech API rejects longer
/// inputs, so fail locally before spending a round trip.
const MAX_TTS_INPUT_BYTES: usize = 4 * 1024;

/// Text-to-speech collaborator.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Renders `text` with `profile`, returning encoded audio bytes in
    /// `profile.format`.
    async fn synthesize(&self, text: &str, profile: &VoiceProfile) -> Result<Vec<u8>, VoiceError>;
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// TTS over an OpenAI-compatible `/audio/speech` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiTts {
    config: SpeechApiConfig,
    client: reqwest::Client,
}

impl OpenAiTts {
    pub fn new(config: SpeechApiConfig) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build TTS client: {}", e)))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiTts {
    async fn synthesize(&self, text: &str, profile: &VoiceProfile) -> Result<Vec<u8>, VoiceError> {
        if text.trim().is_empty() {
            return Err(VoiceError::Synthesis("text is empty".to_string()));
        }
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::Synthesis(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }

        let body = SpeechRequest {
            model: &profile.model,
            input: text,
            voice: &profile.voice,
            response_format: profile.format.api_name(),
        };

        let response = self
            .client
            .post(self.config.endpoint("audio/speech"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Synthesis(format!(
                "TTS API error {}: {}",
                status, detail
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("failed to read audio body: {}", e)))?;
        if audio.is_empty() {
            return Err(VoiceError::Synthesis("TTS API returned no audio".to_string()));
        }
        Ok(audio.to_vec())
    }
}
