use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";

fn default_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_stt_model() -> String {
    "whisper-1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Connection settings for an OpenAI-compatible speech API (TTS and STT).
#[derive(Clone, Serialize, Deserialize)]
pub struct SpeechApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Transcription model. Default: `whisper-1`.
    #[serde(default = "default_stt_model")]
    pub stt_model: String,
    /// Per-request HTTP timeout in seconds. Default: 30.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SpeechApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            stt_model: default_stt_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl fmt::Debug for SpeechApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeechApiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("stt_model", &self.stt_model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl SpeechApiConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Joins `path` onto the base URL, tolerating a trailing slash on either side.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Credentials and URL conventions for the telephony platform's recording store.
#[derive(Clone, Serialize, Deserialize)]
pub struct RecordingStoreConfig {
    /// Account identifier used as the basic-auth user. Empty disables auth.
    #[serde(default)]
    pub account_sid: String,
    #[serde(default, skip_serializing)]
    pub auth_token: String,
    /// Appended to every recording reference before fetching (e.g. `.wav`).
    #[serde(default)]
    pub media_suffix: String,
    /// Per-request HTTP timeout in seconds. Default: 30.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RecordingStoreConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            media_suffix: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl fmt::Debug for RecordingStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingStoreConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .field("media_suffix", &self.media_suffix)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        let config = SpeechApiConfig::new("http://localhost:9000/v1/", "key");
        assert_eq!(
            config.endpoint("/audio/speech"),
            "http://localhost:9000/v1/audio/speech"
        );
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let speech = SpeechApiConfig::new(DEFAULT_API_BASE_URL, "sk-secret");
        assert!(!format!("{:?}", speech).contains("sk-secret"));

        let store = RecordingStoreConfig {
            account_sid: "AC1".into(),
            auth_token: "tok-secret".into(),
            ..Default::default()
        };
        let rendered = format!("{:?}", store);
        assert!(rendered.contains("AC1"));
        assert!(!rendered.contains("tok-secret"));
    }
}
