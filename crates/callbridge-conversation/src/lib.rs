//! Conversation state and reply generation for callbridge.
//!
//! [`SessionRegistry`] keeps one append-only transcript per call and
//! serializes event handling per call id. [`ConversationEngine`] asks a
//! chat-completion service for the next assistant utterance given the full
//! history.

pub mod chat;
pub mod engine;
pub mod error;
pub mod registry;

pub use chat::{ChatCompletion, ChatConfig, OpenAiChat, DETERMINISTIC_TEMPERATURE};
pub use engine::{ConversationEngine, Reply};
pub use error::ConversationError;
pub use registry::{CallGuard, CallSession, InMemorySessionRegistry, SessionEntry, SessionRegistry};
