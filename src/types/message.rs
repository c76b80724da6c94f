use serde::{Deserialize, Serialize};

use crate::types::MessageRole;

/// One entry of the conversation transcript.
///
/// Only the `content` of an assistant message ever changes after creation, and
/// it is always replaced with the full accumulated text rather than appended to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier used to reconcile streamed updates.
    pub id: String,

    /// Author of the message.
    pub role: MessageRole,

    /// Text of the message.
    pub content: String,

    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Message {
    /// Create a new `Message`.
    pub fn new(
        id: impl Into<String>,
        role: MessageRole,
        content: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            timestamp,
        }
    }

    /// Create a new user message.
    pub fn user(id: impl Into<String>, content: impl Into<String>, timestamp: i64) -> Self {
        Self::new(id, MessageRole::User, content, timestamp)
    }

    /// Create an assistant message with no content yet.
    pub fn assistant_placeholder(id: impl Into<String>, timestamp: i64) -> Self {
        Self::new(id, MessageRole::Assistant, String::new(), timestamp)
    }

    /// Returns true for an assistant message that has not received any text.
    pub fn is_empty_assistant(&self) -> bool {
        self.role == MessageRole::Assistant && self.content.is_empty()
    }
}
