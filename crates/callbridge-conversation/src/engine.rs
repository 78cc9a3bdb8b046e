use crate::chat::ChatCompletion;
use crate::error::ConversationError;
use callbridge_types::Turn;
use std::sync::Arc;

/// The assistant's next utterance and the history that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    /// Input transcript followed by the new user turn and the assistant turn.
    pub transcript: Vec<Turn>,
}

/// Produces the next assistant utterance for a conversation.
///
/// Works on a copy of the transcript; committing the new turns to a session
/// is the caller's job, so a failed completion leaves no trace.
#[derive(Clone)]
pub struct ConversationEngine {
    chat: Arc<dyn ChatCompletion>,
}

impl ConversationEngine {
    pub fn new(chat: Arc<dyn ChatCompletion>) -> Self {
        Self { chat }
    }

    pub async fn respond(
        &self,
        transcript: &[Turn],
        user_utterance: &str,
    ) -> Result<Reply, ConversationError> {
        let mut working = Vec::with_capacity(transcript.len() + 2);
        working.extend_from_slice(transcript);
        working.push(Turn::user(user_utterance));

        let text = self
            .chat
            .complete(&working)
            .await?
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(ConversationError::UpstreamEmpty)?;

        working.push(Turn::assistant(text.clone()));
        Ok(Reply {
            text,
            transcript: working,
        })
    }
}

impl std::fmt::Debug for ConversationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationEngine").finish_non_exhaustive()
    }
}
