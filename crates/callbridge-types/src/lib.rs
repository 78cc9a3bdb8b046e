//! Shared types for the callbridge workspace.
//!
//! This crate holds the vocabulary every other crate speaks: conversation
//! turns and roles, call identifiers, telephony call statuses, input capture
//! modes, and voice profiles. It has no runtime dependencies beyond `serde`,
//! which keeps the dependency graph acyclic.

pub mod voice;

pub use voice::{AudioFormat, VoiceProfile};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Author of a conversation turn.
///
/// Serialized lowercase so a transcript can be handed to a chat-completion
/// API as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions that frame the whole conversation.
    System,
    /// The caller.
    User,
    /// The AI agent answering the call.
    Assistant,
}

impl Role {
    /// Returns the wire label for this role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One utterance in a conversation. Immutable once appended to a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Opaque identifier the telephony platform assigns to a call (Twilio `CallSid`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CallId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Call progress reported by the telephony platform's status callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallStatus {
    Queued,
    Ringing,
    InProgress,
    Completed,
    Busy,
    Failed,
    NoAnswer,
    Canceled,
    /// A status string this build does not recognize. Never terminal.
    Unknown(String),
}

impl CallStatus {
    /// Parses a platform status label (`"in-progress"`, `"no-answer"`, ...).
    ///
    /// Parsing never fails: unrecognized labels become [`CallStatus::Unknown`].
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "queued" => Self::Queued,
            "ringing" => Self::Ringing,
            "in-progress" => Self::InProgress,
            "completed" => Self::Completed,
            "busy" => Self::Busy,
            "failed" => Self::Failed,
            "no-answer" => Self::NoAnswer,
            "canceled" => Self::Canceled,
            _ => Self::Unknown(label.to_string()),
        }
    }

    /// Returns `true` once the call can no longer produce capture events.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Busy | Self::Failed | Self::NoAnswer | Self::Canceled
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Queued => "queued",
            Self::Ringing => "ringing",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Busy => "busy",
            Self::Failed => "failed",
            Self::NoAnswer => "no-answer",
            Self::Canceled => "canceled",
            Self::Unknown(label) => label,
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the telephony platform captures the caller's next utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Platform-side speech recognition; the callback carries recognized text.
    #[default]
    Speech,
    /// Raw audio recording; the callback carries a recording reference that
    /// must be fetched and transcribed.
    Recording,
}

impl std::str::FromStr for CaptureMode {
    type Err = ParseCaptureModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "speech" => Ok(Self::Speech),
            "recording" => Ok(Self::Recording),
            _ => Err(ParseCaptureModeError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown capture mode string.
#[derive(Debug, Clone)]
pub struct ParseCaptureModeError(pub String);

impl fmt::Display for ParseCaptureModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown capture mode: {}", self.0)
    }
}

impl std::error::Error for ParseCaptureModeError {}
