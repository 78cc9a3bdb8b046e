//! Server configuration loading from file and environment variables.

use callbridge_conversation::ChatConfig;
use callbridge_types::{AudioFormat, CaptureMode, VoiceProfile};
use callbridge_voice::{RecordingStoreConfig, RetryPolicy, SpeechApiConfig, DEFAULT_API_BASE_URL};
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::controller::CallSettings;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Chat, speech and transcription API settings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Telephony recording store credentials.
    #[serde(default)]
    pub twilio: TwilioConfig,

    /// Per-call conversation behavior.
    #[serde(default)]
    pub call: CallConfig,

    /// Recording availability polling.
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Where artifacts and transcripts are written.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL used for audio links, e.g.
    /// `https://calls.example.com`. When unset, derived from request headers.
    #[serde(default)]
    pub public_url: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "callbridge_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Clone, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_tts_voice")]
    pub tts_voice: String,
    #[serde(default)]
    pub tts_format: AudioFormat,
    #[serde(default = "default_stt_model")]
    pub stt_model: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Clone, Deserialize)]
pub struct TwilioConfig {
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub auth_token: String,
    /// Appended to `RecordingUrl` to select the media format.
    #[serde(default = "default_recording_suffix")]
    pub recording_suffix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_greeting")]
    pub greeting: String,
    /// Spoken when a turn cannot be completed.
    #[serde(default = "default_apology")]
    pub apology: String,
    #[serde(default)]
    pub capture_mode: CaptureMode,
    /// BCP-47 tag, e.g. `en-US`.
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_gather_timeout_secs")]
    pub gather_timeout_secs: u32,
    #[serde(default = "default_max_recording_secs")]
    pub max_recording_secs: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffKind,
    /// Interval cap for exponential backoff.
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_audio_dir")]
    pub audio_dir: PathBuf,
    /// Transcripts are only logged when unset.
    #[serde(default)]
    pub transcripts_dir: Option<PathBuf>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    256
}

fn default_tts_model() -> String {
    "tts-1".to_string()
}

fn default_tts_voice() -> String {
    "alloy".to_string()
}

fn default_stt_model() -> String {
    "whisper-1".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_recording_suffix() -> String {
    ".wav".to_string()
}

fn default_system_prompt() -> String {
    "You are a friendly phone assistant for a print shop. Help the caller place \
     an order for posters or flyers. Ask one short question at a time about \
     quantity, size, paper, and delivery. Keep every answer under three sentences."
        .to_string()
}

fn default_greeting() -> String {
    "Hi! Thanks for calling. What would you like to print today?".to_string()
}

fn default_apology() -> String {
    "Sorry, I didn't catch that. Could you say it again?".to_string()
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_gather_timeout_secs() -> u32 {
    5
}

fn default_max_recording_secs() -> u32 {
    30
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_poll_attempts() -> u32 {
    20
}

fn default_max_poll_interval_ms() -> u64 {
    1_000
}

fn default_audio_dir() -> PathBuf {
    PathBuf::from("audio")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            api_key: String::new(),
            chat_model: default_chat_model(),
            max_tokens: default_max_tokens(),
            tts_model: default_tts_model(),
            tts_voice: default_tts_voice(),
            tts_format: AudioFormat::default(),
            stt_model: default_stt_model(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("chat_model", &self.chat_model)
            .field("max_tokens", &self.max_tokens)
            .field("tts_model", &self.tts_model)
            .field("tts_voice", &self.tts_voice)
            .field("tts_format", &self.tts_format)
            .field("stt_model", &self.stt_model)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            recording_suffix: default_recording_suffix(),
        }
    }
}

impl fmt::Debug for TwilioConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwilioConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .field("recording_suffix", &self.recording_suffix)
            .finish()
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            greeting: default_greeting(),
            apology: default_apology(),
            capture_mode: CaptureMode::default(),
            language: default_language(),
            gather_timeout_secs: default_gather_timeout_secs(),
            max_recording_secs: default_max_recording_secs(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            poll_attempts: default_poll_attempts(),
            backoff: BackoffKind::default(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            audio_dir: default_audio_dir(),
            transcripts_dir: None,
        }
    }
}

impl Config {
    pub fn chat(&self) -> ChatConfig {
        ChatConfig {
            base_url: self.openai.base_url.clone(),
            api_key: self.openai.api_key.clone(),
            model: self.openai.chat_model.clone(),
            max_tokens: self.openai.max_tokens,
            timeout_secs: self.openai.request_timeout_secs,
        }
    }

    pub fn speech_api(&self) -> SpeechApiConfig {
        SpeechApiConfig {
            base_url: self.openai.base_url.clone(),
            api_key: self.openai.api_key.clone(),
            stt_model: self.openai.stt_model.clone(),
            timeout_secs: self.openai.request_timeout_secs,
        }
    }

    pub fn voice_profile(&self) -> VoiceProfile {
        VoiceProfile {
            model: self.openai.tts_model.clone(),
            voice: self.openai.tts_voice.clone(),
            format: self.openai.tts_format,
        }
    }

    pub fn recording_store(&self) -> RecordingStoreConfig {
        RecordingStoreConfig {
            account_sid: self.twilio.account_sid.clone(),
            auth_token: self.twilio.auth_token.clone(),
            media_suffix: self.twilio.recording_suffix.clone(),
            timeout_secs: self.openai.request_timeout_secs,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let interval = Duration::from_millis(self.recording.poll_interval_ms);
        match self.recording.backoff {
            BackoffKind::Fixed => RetryPolicy::fixed(interval, self.recording.poll_attempts),
            BackoffKind::Exponential => RetryPolicy::exponential(
                interval,
                Duration::from_millis(self.recording.max_poll_interval_ms),
                self.recording.poll_attempts,
            ),
        }
    }

    /// Language for transcription requests: the primary subtag of
    /// `call.language` (`en-US` becomes `en`).
    pub fn transcription_language(&self) -> String {
        self.call
            .language
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    }

    pub fn call_settings(&self) -> CallSettings {
        CallSettings {
            system_prompt: self.call.system_prompt.clone(),
            greeting: self.call.greeting.clone(),
            apology: self.call.apology.clone(),
            capture_mode: self.call.capture_mode,
            language: self.call.language.clone(),
            gather_timeout_secs: self.call.gather_timeout_secs,
            max_recording_secs: self.call.max_recording_secs,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CALLBRIDGE_HOST` overrides `server.host`
/// - `CALLBRIDGE_PORT` overrides `server.port`
/// - `CALLBRIDGE_PUBLIC_URL` overrides `server.public_url`
/// - `CALLBRIDGE_LOG_LEVEL` overrides `logging.level`
/// - `CALLBRIDGE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `CALLBRIDGE_AUDIO_DIR` overrides `storage.audio_dir`
/// - `CALLBRIDGE_TRANSCRIPTS_DIR` overrides `storage.transcripts_dir`
/// - `CALLBRIDGE_CAPTURE_MODE` overrides `call.capture_mode`
/// - `OPENAI_API_KEY` / `OPENAI_BASE_URL` override `openai.api_key` / `openai.base_url`
/// - `TWILIO_ACCOUNT_SID` / `TWILIO_AUTH_TOKEN` override the `twilio` credentials
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if a value is out of range.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// [`load_config`] with environment lookups routed through `lookup`.
fn load_config_with(
    path: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    let config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    let config = apply_env_overrides(config, lookup)?;
    validate(&config)?;
    Ok(config)
}

/// Applies overrides from `lookup`, which maps a variable name to its value.
fn apply_env_overrides(
    mut config: Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    if let Some(host) = lookup("CALLBRIDGE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("CALLBRIDGE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(url) = lookup("CALLBRIDGE_PUBLIC_URL") {
        config.server.public_url = Some(url).filter(|u| !u.trim().is_empty());
    }
    if let Some(level) = lookup("CALLBRIDGE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("CALLBRIDGE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(dir) = lookup("CALLBRIDGE_AUDIO_DIR") {
        config.storage.audio_dir = PathBuf::from(dir);
    }
    if let Some(dir) = lookup("CALLBRIDGE_TRANSCRIPTS_DIR") {
        config.storage.transcripts_dir = Some(PathBuf::from(dir));
    }
    if let Some(mode) = lookup("CALLBRIDGE_CAPTURE_MODE") {
        config.call.capture_mode = mode
            .parse()
            .map_err(|e: callbridge_types::ParseCaptureModeError| {
                ConfigError::Invalid(e.to_string())
            })?;
    }
    if let Some(key) = lookup("OPENAI_API_KEY") {
        config.openai.api_key = key;
    }
    if let Some(url) = lookup("OPENAI_BASE_URL") {
        config.openai.base_url = url;
    }
    if let Some(sid) = lookup("TWILIO_ACCOUNT_SID") {
        config.twilio.account_sid = sid;
    }
    if let Some(token) = lookup("TWILIO_AUTH_TOKEN") {
        config.twilio.auth_token = token;
    }
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.recording.poll_attempts == 0 {
        return Err(ConfigError::Invalid(
            "recording.poll_attempts must be at least 1".into(),
        ));
    }
    if config.recording.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid(
            "recording.poll_interval_ms must be greater than 0".into(),
        ));
    }
    if let Some(url) = &config.server.public_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "server.public_url must be an http(s) URL, got {url}"
            )));
        }
    }
    Ok(())
}
