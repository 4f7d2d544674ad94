use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Text shown while the assistant is working on a reply
pub const PLACEHOLDER_TEXT: &str = "AI is thinking...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Pending-reply placeholder
    Loading,
}

/// One entry of the caller-visible conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Session clock reading when the message was added
    #[serde(skip)]
    pub at: Duration,
}

impl ChatMessage {
    fn new(prefix: &str, role: Role, content: &str, at: Duration) -> Self {
        Self {
            id: format!("{}-{}", prefix, uuid::Uuid::new_v4()),
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
            at,
        }
    }
}

/// Transcript/response log with a trailing placeholder while a reply is pending
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    response_loading: bool,
    duplicate_window: Duration,
}

impl Conversation {
    pub fn new(duplicate_window: Duration) -> Self {
        Self {
            messages: Vec::new(),
            response_loading: false,
            duplicate_window,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn response_loading(&self) -> bool {
        self.response_loading
    }

    pub fn has_placeholder(&self) -> bool {
        self.messages.last().is_some_and(|m| m.role == Role::Loading)
    }

    /// Record a recognized utterance and show the placeholder after it
    pub fn push_user(&mut self, text: &str, at: Duration) -> ChatMessage {
        self.clear_placeholder();
        let message = ChatMessage::new("voice-user", Role::User, text, at);
        self.messages.push(message.clone());
        self.messages
            .push(ChatMessage::new("loading", Role::Loading, PLACEHOLDER_TEXT, at));
        self.response_loading = true;
        message
    }

    /// Record an assistant reply; `None` when it repeats a very recent one
    ///
    /// Repetition is judged on identical content inside the duplicate window,
    /// which is a heuristic and may drop a genuinely repeated reply.
    pub fn push_assistant(&mut self, text: &str, at: Duration) -> Option<ChatMessage> {
        self.clear_placeholder();
        self.response_loading = false;

        let window = self.duplicate_window;
        let duplicate = self.messages.iter().any(|m| {
            m.role == Role::Assistant && m.content == text && at.saturating_sub(m.at) < window
        });
        if duplicate {
            return None;
        }

        let message = ChatMessage::new("voice-assistant", Role::Assistant, text, at);
        self.messages.push(message.clone());
        Some(message)
    }

    /// Remove one trailing placeholder
    pub fn clear_placeholder(&mut self) -> bool {
        if self.has_placeholder() {
            self.messages.pop();
            true
        } else {
            false
        }
    }

    /// Remove every trailing placeholder and stop waiting for a reply
    pub fn clear_placeholders(&mut self) -> usize {
        let mut removed = 0;
        while self.clear_placeholder() {
            removed += 1;
        }
        self.response_loading = false;
        removed
    }
}
