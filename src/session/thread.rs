//! Conversation lane contents

use super::StateBlob;
use crate::llm::{LlmMessage, MessageRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in a conversation lane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub role: MessageRole,
    pub text: String,
    /// Responder or orchestrator that wrote an assistant turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Ordered message history for one lane of a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    messages: Vec<ThreadMessage>,
}

impl Thread {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(ThreadMessage {
            role: MessageRole::User,
            text: text.into(),
            author: None,
            created_at: Utc::now(),
        });
    }

    pub fn push_assistant(&mut self, author: impl Into<String>, text: impl Into<String>) {
        self.messages.push(ThreadMessage {
            role: MessageRole::Assistant,
            text: text.into(),
            author: Some(author.into()),
            created_at: Utc::now(),
        });
    }

    /// Append a user utterance and the answer it received
    #[must_use]
    pub fn with_exchange(
        mut self,
        utterance: impl Into<String>,
        author: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        self.push_user(utterance);
        self.push_assistant(author, answer);
        self
    }

    pub fn messages(&self) -> &[ThreadMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether any message carries exactly this text
    pub fn contains_text(&self, text: &str) -> bool {
        self.messages.iter().any(|m| m.text == text)
    }

    /// History in the shape the language capability expects
    pub fn to_llm_messages(&self) -> Vec<LlmMessage> {
        self.messages
            .iter()
            .map(|m| match m.role {
                MessageRole::User => LlmMessage::user(m.text.clone()),
                MessageRole::Assistant => LlmMessage::assistant(m.text.clone()),
            })
            .collect()
    }

    pub fn to_blob(&self) -> Result<StateBlob, serde_json::Error> {
        serde_json::to_string(self).map(StateBlob::new)
    }

    pub fn from_blob(blob: &StateBlob) -> Result<Self, serde_json::Error> {
        serde_json::from_str(blob.as_str())
    }
}
