//! Conversation log for a session.
//!
//! Stages only ever see a bounded window of the most recent entries.

use serde::{Deserialize, Serialize};

/// Who said something.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One line of conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
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

/// Append-only conversation history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationLog {
    entries: Vec<HistoryEntry>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one exchange: the user's message, then the reply.
    pub fn record_exchange(&mut self, message: impl Into<String>, reply: impl Into<String>) {
        self.entries.push(HistoryEntry::user(message));
        self.entries.push(HistoryEntry::assistant(reply));
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The last `n` entries of `history`.
pub fn recent(history: &[HistoryEntry], n: usize) -> &[HistoryEntry] {
    &history[history.len().saturating_sub(n)..]
}

/// Render history lines for a prompt, naming the character for assistant
/// turns. `max_chars` truncates each line when set.
pub fn render(history: &[HistoryEntry], character_name: &str, max_chars: Option<usize>) -> String {
    let mut out = String::new();
    for entry in history {
        let speaker = match entry.role {
            Role::User => "User",
            Role::Assistant => character_name,
        };
        match max_chars {
            Some(limit) if entry.content.chars().count() > limit => {
                let cut: String = entry.content.chars().take(limit).collect();
                out.push_str(&format!("{speaker}: {cut}...\n"));
            }
            _ => out.push_str(&format!("{speaker}: {}\n", entry.content)),
        }
    }
    out
}
