// ABOUTME: C7 - bounded assistant/user dialogue tail handed to MCP control calls for continuity
// ABOUTME: Evicts two entries at a time so the tail always starts with an assistant turn and ends with a user turn

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ConversationMessage {
    Assistant { content: String },
    User { content: String },
}

/// C7. A bounded deque of at most `2*N` entries (default N=4). Pair-wise
/// head eviction (§4.7) is a deliberate tightening over the Python
/// original, which evicted one entry at a time and could leave the tail
/// starting mid-round (see SPEC_FULL.md §9 open question).
pub struct ConversationLog {
    entries: Mutex<VecDeque<ConversationMessage>>,
    cap: usize,
}

impl ConversationLog {
    pub fn new(max_rounds: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(2 * max_rounds)),
            cap: 2 * max_rounds.max(1),
        }
    }

    pub fn append_assistant(&self, content: impl Into<String>) {
        self.append(ConversationMessage::Assistant {
            content: content.into(),
        });
    }

    pub fn append_user(&self, content: impl Into<String>) {
        self.append(ConversationMessage::User {
            content: content.into(),
        });
    }

    fn append(&self, message: ConversationMessage) {
        let mut entries = self.entries.lock();
        entries.push_back(message);
        while entries.len() > self.cap {
            entries.pop_front();
            entries.pop_front();
        }
    }

    /// Returns a defensive copy of the current tail.
    pub fn snapshot(&self) -> Vec<ConversationMessage> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
