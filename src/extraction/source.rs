//! Incremental content sources.
//!
//! An [`IncrementalSource`] is an append-only sequence of items (for example
//! the messages of a conversation) that is re-analyzed as it grows.

use std::ops::Range;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// One role-tagged item of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

pub trait IncrementalSource: Send + Sync {
    /// Stable identifier; bookmarks are keyed by it.
    fn id(&self) -> &str;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items in `range`, clamped to the current length.
    fn items(&self, range: Range<usize>) -> Vec<Message>;
}

/// Renders a window of items as the text handed to the extraction pipeline.
pub trait SourceFormatter: Send + Sync {
    fn format(&self, items: &[Message]) -> String;
}

/// `role: content`, one message per line.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageFormatter;

impl SourceFormatter for MessageFormatter {
    fn format(&self, items: &[Message]) -> String {
        items
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ── Conversation ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, message: Message) -> &mut Self {
        self.messages.push(message);
        self
    }

    /// Append a user message and the assistant's reply.
    pub fn exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) -> &mut Self {
        self.push(Message::user(user)).push(Message::assistant(assistant))
    }
}

/// A conversation snapshot viewed as an incremental source.
#[derive(Debug, Clone)]
pub struct ConversationSource {
    conversation: Conversation,
}

impl ConversationSource {
    pub fn new(conversation: Conversation) -> Self {
        Self { conversation }
    }
}

impl IncrementalSource for ConversationSource {
    fn id(&self) -> &str {
        &self.conversation.id
    }

    fn len(&self) -> usize {
        self.conversation.messages.len()
    }

    fn items(&self, range: Range<usize>) -> Vec<Message> {
        let len = self.len();
        let start = range.start.min(len);
        let end = range.end.clamp(start, len);
        self.conversation.messages[start..end].to_vec()
    }
}
