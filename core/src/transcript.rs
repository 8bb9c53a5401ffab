use backend_api::{MessageRow, ProfileSummary};
use std::collections::HashSet;

/// Number of messages fetched when the chat opens.
pub const HISTORY_LIMIT: usize = 50;

/// A message together with whatever we could resolve about its author.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatEntry {
    pub message: MessageRow,
    pub author: Option<ProfileSummary>,
}

impl ChatEntry {
    /// Name to show above the message; "Unknown" if the author could not be
    /// resolved.
    pub fn author_name(&self) -> &str {
        self.author
            .as_ref()
            .and_then(|a| a.username.as_deref())
            .filter(|name| !name.is_empty())
            .unwrap_or("Unknown")
    }

    pub fn is_from(&self, user_id: &str) -> bool {
        self.message.user_id == user_id
    }
}

/// Chat messages oldest-first. Appends are not deduplicated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    entries: Vec<ChatEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair fetched history with the author summaries fetched for it.
    pub fn from_history(messages: Vec<MessageRow>, authors: &[ProfileSummary]) -> Self {
        let entries = messages
            .into_iter()
            .map(|message| {
                let author = authors.iter().find(|a| a.id == message.user_id).cloned();
                ChatEntry { message, author }
            })
            .collect();
        Self { entries }
    }

    pub fn push(&mut self, entry: ChatEntry) {
        self.entries.push(entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&ChatEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Author ids referenced by `messages`, first appearance first.
pub fn distinct_authors(messages: &[MessageRow]) -> Vec<String> {
    let mut seen = HashSet::new();
    messages
        .iter()
        .filter(|m| seen.insert(m.user_id.as_str()))
        .map(|m| m.user_id.clone())
        .collect()
}
