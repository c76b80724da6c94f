use serde::{Deserialize, Serialize};

use crate::types::{Message, MessageRole};

/// A message as sent to the completions endpoint: role and content only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessageParam {
    /// The role of the message.
    pub role: MessageRole,

    /// The content of the message.
    pub content: String,
}

impl From<&Message> for ChatMessageParam {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Body of a streaming chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// Model identifier.
    pub model: String,

    /// Conversation so far, oldest first.
    pub messages: Vec<ChatMessageParam>,

    /// Always true for requests issued by the session.
    pub stream: bool,
}

impl ChatCompletionRequest {
    /// Create a streaming request from transcript messages.
    ///
    /// Ids and timestamps are stripped.
    pub fn streaming<'a>(
        model: impl Into<String>,
        messages: impl IntoIterator<Item = &'a Message>,
    ) -> Self {
        Self {
            model: model.into(),
            messages: messages.into_iter().map(ChatMessageParam::from).collect(),
            stream: true,
        }
    }
}
