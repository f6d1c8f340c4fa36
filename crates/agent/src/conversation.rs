use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Bounded user/assistant history for one session.
///
/// Entries are only ever dropped from the front, so order is preserved and the length never
/// exceeds the limit once an append returns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationHistory {
    entries: VecDeque<ChatMessage>,
    limit: usize,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(20)
    }
}

impl ConversationHistory {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(2);
        Self { entries: VecDeque::with_capacity(limit + 2), limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter()
    }

    /// Commits one completed turn: the raw user text and the generated reply.
    pub fn push_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.entries.push_back(ChatMessage::user(user));
        self.entries.push_back(ChatMessage::assistant(assistant));
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{ChatRole, ConversationHistory};

    #[test]
    fn history_never_exceeds_limit() {
        let mut history = ConversationHistory::new(20);

        for turn in 0..37 {
            history.push_exchange(format!("question {turn}"), format!("answer {turn}"));
            assert!(history.len() <= 20);
        }

        assert_eq!(history.len(), 20);
        let first = history.iter().next().map(|message| message.content.as_str());
        assert_eq!(first, Some("question 27"));
        let last = history.iter().last().map(|message| message.content.as_str());
        assert_eq!(last, Some("answer 36"));
    }

    #[test]
    fn roles_alternate_after_truncation() {
        let mut history = ConversationHistory::new(4);
        for turn in 0..5 {
            history.push_exchange(format!("q{turn}"), format!("a{turn}"));
        }

        let roles: Vec<_> = history.iter().map(|message| message.role).collect();
        assert_eq!(
            roles,
            vec![ChatRole::User, ChatRole::Assistant, ChatRole::User, ChatRole::Assistant]
        );
    }

    #[test]
    fn clear_empties_history() {
        let mut history = ConversationHistory::default();
        history.push_exchange("hi", "hello");
        history.clear();
        assert!(history.is_empty());
    }

    #[test]
    fn roles_serialize_lowercase() {
        let rendered = serde_json::to_string(&ChatRole::Assistant).expect("serialize");
        assert_eq!(rendered, "\"assistant\"");
    }
}
