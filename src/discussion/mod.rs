//! Course discussion threads.
//!
//! ## Design
//! - The tree is re-fetched and replaced on every relevant event; reply
//!   relationships make partial patching error-prone, so none is attempted
//! - Content arrives in a legacy wrapped encoding and is decoded once, when a
//!   snapshot is normalized, never at display time
//! - One engine per open course/role pair

pub mod engine;
pub mod thread;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sync::SyncPhase;

#[allow(unused_imports)]
pub use engine::{DiscussionEngine, DiscussionHandle, ThreadStore};
#[allow(unused_imports)]
pub use thread::{mention_suggestions, replace_mention_token, MAX_MENTION_SUGGESTIONS};

/// One node of a discussion tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscussionMessage {
    pub id: i64,
    /// `None` for a thread root.
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub sender_avatar: Option<String>,
    #[serde(with = "crate::api::timestamp")]
    pub created_at: DateTime<Utc>,
    /// Only meaningful on thread roots.
    #[serde(default)]
    pub pinned: bool,
    /// Only meaningful on replies.
    #[serde(default)]
    pub best_answer: bool,
    #[serde(default, deserialize_with = "nullable_replies")]
    pub replies: Vec<DiscussionMessage>,
}

fn nullable_replies<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<DiscussionMessage>, D::Error> {
    Ok(Option::<Vec<DiscussionMessage>>::deserialize(deserializer)?.unwrap_or_default())
}

impl DiscussionMessage {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Read-only snapshot of one discussion handed to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscussionView {
    pub phase: SyncPhase,
    /// A loader-visible load is in flight.
    pub loading: bool,
    /// Thread roots, every level sorted ascending by `created_at`.
    pub threads: Vec<DiscussionMessage>,
    /// Distinct sender first names, sorted.
    pub participants: Vec<String>,
}

impl Default for DiscussionView {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Uninitialized,
            loading: false,
            threads: Vec::new(),
            participants: Vec::new(),
        }
    }
}

impl DiscussionView {
    pub fn find(&self, id: i64) -> Option<&DiscussionMessage> {
        thread::find(&self.threads, id)
    }

    /// Completion candidates for the trailing `@token` of a draft.
    pub fn mention_suggestions(&self, draft: &str) -> Vec<String> {
        thread::mention_suggestions(draft, &self.participants)
    }

    /// Total number of messages in the tree.
    pub fn message_count(&self) -> usize {
        fn count(messages: &[DiscussionMessage]) -> usize {
            messages.iter().map(|m| 1 + count(&m.replies)).sum()
        }
        count(&self.threads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_backend_message_with_null_replies() {
        let raw = r#"{
            "id": 10,
            "parentId": null,
            "content": "{\"hi there\"}",
            "senderName": "Ada Lovelace",
            "senderAvatar": null,
            "createdAt": "2024-04-02T09:15:00",
            "replies": null,
            "pinned": true,
            "bestAnswer": false
        }"#;
        let message: DiscussionMessage = serde_json::from_str(raw).unwrap();
        assert!(message.is_root());
        assert!(message.pinned);
        assert!(message.replies.is_empty());
        assert_eq!(message.content, r#"{"hi there"}"#);
    }

    #[test]
    fn view_counts_and_finds_nested_messages() {
        let raw = r#"[{
            "id": 1, "content": "a", "senderName": "Ada", "createdAt": "2024-04-02T09:00:00",
            "replies": [{"id": 2, "parentId": 1, "content": "b", "senderName": "Bob",
                         "createdAt": "2024-04-02T09:01:00"}]
        }]"#;
        let threads: Vec<DiscussionMessage> = serde_json::from_str(raw).unwrap();
        let view = DiscussionView {
            participants: thread::participant_names(&threads),
            threads,
            ..DiscussionView::default()
        };

        assert_eq!(view.message_count(), 2);
        assert_eq!(view.find(2).map(|m| m.parent_id), Some(Some(1)));
        assert_eq!(view.mention_suggestions("cc @b"), vec!["Bob"]);
    }
}
