//! Conversation transcript types shared by the gateway and the terminal
//! client.
//!
//! The wire format is deliberately thin: a chat request carries only the
//! `{role, content}` pairs of recent turns, windowed to [`HISTORY_WINDOW`]
//! entries so prompts stay bounded no matter how long a session runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tools::ToolName;

/// Maximum number of prior turns sent with a chat request.
pub const HISTORY_WINDOW: usize = 10;

/// Maximum turns a client keeps in memory; older turns are evicted.
pub const MAX_STORED_MESSAGES: usize = 100;

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One prior turn as sent over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

/// Record of the tool invocation behind an assistant turn. Exactly one of
/// `result` and `error` is set when the invocation ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub name: ToolName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A rendered chat turn, as kept by the terminal client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_used: Option<ToolUsage>,
}

impl ChatMessage {
    fn new(role: Role, content: String, tool_used: Option<ToolUsage>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            timestamp: Utc::now(),
            tool_used,
        }
    }
}

/// Rolling transcript for one client session.
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::new(Role::User, content.into(), None));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>, tool_used: Option<ToolUsage>) {
        self.push(ChatMessage::new(Role::Assistant, content.into(), tool_used));
    }

    fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        if self.messages.len() > MAX_STORED_MESSAGES {
            let excess = self.messages.len() - MAX_STORED_MESSAGES;
            self.messages.drain(..excess);
        }
    }

    /// The last [`HISTORY_WINDOW`] turns, stripped to their wire shape.
    ///
    /// The window is taken before the in-flight user message is appended, so
    /// the prompt never repeats the message it closes with.
    pub fn window(&self) -> Vec<HistoryEntry> {
        let start = self.messages.len().saturating_sub(HISTORY_WINDOW);
        self.messages[start..]
            .iter()
            .map(|msg| HistoryEntry {
                role: msg.role,
                content: msg.content.clone(),
            })
            .collect()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
