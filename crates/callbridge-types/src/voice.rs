//! Voice profile and audio format definitions.
//!
//! A `VoiceProfile` pins the TTS model, voice and container format used for
//! every utterance an agent speaks on a call.

use serde::{Deserialize, Serialize};

/// Container format of synthesized audio.
///
/// Both formats are playable by the telephony platform's `<Play>` verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Wav,
}

impl AudioFormat {
    /// File extension used for artifacts in this format.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
        }
    }

    /// Value of the TTS API's `response_format` parameter.
    pub fn api_name(self) -> &'static str {
        self.extension()
    }
}

/// A voice profile configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    /// TTS model name (e.g. `tts-1`).
    pub model: String,
    /// Voice name within the model (e.g. `alloy`).
    pub voice: String,
    /// Output container format.
    #[serde(default)]
    pub format: AudioFormat,
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self {
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            format: AudioFormat::Mp3,
        }
    }
}
