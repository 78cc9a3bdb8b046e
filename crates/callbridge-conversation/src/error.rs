//! Error types for sessions and the conversation engine.

use callbridge_types::CallId;

/// Errors raised by the session registry and the conversation engine.
#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    /// No live session exists for the call.
    #[error("no session for call {0}")]
    SessionNotFound(CallId),

    /// The chat-completion service answered without any content.
    #[error("chat completion returned no content")]
    UpstreamEmpty,

    /// The chat-completion request failed (transport, HTTP status, or decoding).
    #[error("chat completion failed: {0}")]
    Upstream(String),

    /// Invalid client configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}
