//! Conversation context service
//!
//! Bounded per-session history used by LLM decision providers to keep
//! replies coherent across turns. Sessions are keyed by message source so
//! each input channel gets its own thread of conversation.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use aituber_core::unix_now;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: f64,
}

/// In-memory conversation history, bounded per session.
pub struct ContextService {
    sessions: Mutex<HashMap<String, VecDeque<ContextMessage>>>,
    max_history: usize,
}

impl ContextService {
    pub fn new(max_history: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_history: max_history.max(1),
        }
    }

    pub fn add_message(&self, session_id: &str, role: MessageRole, content: impl Into<String>) {
        let mut sessions = self.sessions.lock();
        let history = sessions.entry(session_id.to_string()).or_default();
        history.push_back(ContextMessage {
            role,
            content: content.into(),
            timestamp: unix_now(),
        });
        while history.len() > self.max_history {
            history.pop_front();
        }
    }

    /// The most recent `limit` messages, oldest first.
    pub fn history(&self, session_id: &str, limit: usize) -> Vec<ContextMessage> {
        let sessions = self.sessions.lock();
        let Some(history) = sessions.get(session_id) else {
            return Vec::new();
        };
        history
            .iter()
            .skip(history.len().saturating_sub(limit))
            .cloned()
            .collect()
    }

    pub fn clear_session(&self, session_id: &str) {
        self.sessions.lock().remove(session_id);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

impl Default for ContextService {
    fn default() -> Self {
        Self::new(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_ordering_and_limit() {
        let service = ContextService::new(10);
        for i in 0..5 {
            service.add_message("console", MessageRole::User, format!("msg {i}"));
        }
        let last_two = service.history("console", 2);
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].content, "msg 3");
        assert_eq!(last_two[1].content, "msg 4");
    }

    #[test]
    fn test_history_is_bounded() {
        let service = ContextService::new(3);
        for i in 0..10 {
            service.add_message("s", MessageRole::Assistant, format!("{i}"));
        }
        let all = service.history("s", 100);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].content, "7");
    }

    #[test]
    fn test_sessions_are_isolated() {
        let service = ContextService::default();
        service.add_message("a", MessageRole::User, "for a");
        service.add_message("b", MessageRole::User, "for b");
        assert_eq!(service.history("a", 10).len(), 1);
        assert_eq!(service.session_count(), 2);

        service.clear_session("a");
        assert!(service.history("a", 10).is_empty());
        assert_eq!(service.history("b", 10).len(), 1);
    }
}
