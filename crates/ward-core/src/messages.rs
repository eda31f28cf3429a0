//! Conversation message model.
//!
//! Messages form the group-chat history shared between the user and the
//! participating agents. Three roles: user, assistant, and system. Assistant
//! messages carry the speaking agent's name so the scheduler and the
//! selection rules can attribute them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Literal prefix of the ephemeral grounding snapshot line.
///
/// A system message whose content starts with this prefix is a snapshot:
/// injected fresh at index 0 every turn, stripped before every write, and
/// never persisted. The history store's write filter, the snapshot
/// injector, and the scheduler's termination override all key off this
/// single constant.
pub const SNAPSHOT_PREFIX: &str = "PATIENT_CONTEXT_JSON:";

// ─────────────────────────────────────────────────────────────────────────────
// Role
// ─────────────────────────────────────────────────────────────────────────────

/// Message author role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human user.
    User,
    /// An agent (the `name` field says which one).
    Assistant,
    /// Runtime-level grounding or instructions.
    System,
}

impl Role {
    /// Parse a persisted role string. Unknown roles return `None` so the
    /// reader can skip the message instead of failing the whole document.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ChatMessage
// ─────────────────────────────────────────────────────────────────────────────

/// One message in a conversation history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role.
    pub role: Role,
    /// Speaking agent name, set on assistant messages.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    /// Text payload.
    pub content: String,
}

impl ChatMessage {
    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            name: None,
            content: content.into(),
        }
    }

    /// Create an unattributed assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            name: None,
            content: content.into(),
        }
    }

    /// Create an assistant message attributed to an agent.
    #[must_use]
    pub fn assistant_named(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            name: Some(name.into()),
            content: content.into(),
        }
    }

    /// Create a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            name: None,
            content: content.into(),
        }
    }

    /// Whether this message is the ephemeral grounding snapshot.
    #[must_use]
    pub fn is_snapshot(&self) -> bool {
        self.role == Role::System && self.content.starts_with(SNAPSHOT_PREFIX)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ChatHistory
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered sequence of messages. Persistence preserves order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatHistory {
    /// The messages, oldest first.
    pub messages: Vec<ChatMessage>,
}

impl ChatHistory {
    /// Create an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the history holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The most recent message, if any.
    #[must_use]
    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// The most recent message that is not a system message.
    #[must_use]
    pub fn last_non_system(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.role != Role::System)
    }

    /// Append a message.
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Append a user message.
    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::user(content));
    }

    /// Append an assistant message attributed to an agent.
    pub fn add_assistant_message(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.push(ChatMessage::assistant_named(name, content));
    }

    /// Remove all messages.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Names of agents that have spoken since the most recent user message.
    #[must_use]
    pub fn speakers_since_last_user(&self) -> Vec<&str> {
        let mut speakers = Vec::new();
        for msg in self.messages.iter().rev() {
            match msg.role {
                Role::User => break,
                Role::Assistant => {
                    if let Some(name) = msg.name.as_deref() {
                        speakers.push(name);
                    }
                }
                Role::System => {}
            }
        }
        speakers.reverse();
        speakers
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
