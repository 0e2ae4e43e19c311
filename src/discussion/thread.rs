//! Pure tree utilities for discussion threads: content normalization,
//! recursive ordering, participant extraction and `@mention` completion.

use super::DiscussionMessage;
use crate::api::decode_content;

/// Maximum number of mention suggestions offered at once.
pub const MAX_MENTION_SUGGESTIONS: usize = 6;

/// Decode every node's content and sort every level ascending by
/// `created_at`. This is the shape the engine stores.
pub fn normalize(messages: Vec<DiscussionMessage>) -> Vec<DiscussionMessage> {
    let mut messages: Vec<DiscussionMessage> = messages.into_iter().map(decode_node).collect();
    sort_ascending(&mut messages);
    messages
}

fn decode_node(mut message: DiscussionMessage) -> DiscussionMessage {
    message.content = decode_content(&message.content);
    message.replies = message.replies.into_iter().map(decode_node).collect();
    message
}

/// Stable ascending sort by timestamp at every level; equal timestamps keep
/// server order.
pub fn sort_ascending(messages: &mut [DiscussionMessage]) {
    messages.sort_by_key(|m| m.created_at);
    for message in messages.iter_mut() {
        sort_ascending(&mut message.replies);
    }
}

/// Depth-first search for a message by id.
pub fn find(messages: &[DiscussionMessage], id: i64) -> Option<&DiscussionMessage> {
    messages
        .iter()
        .find_map(|m| if m.id == id { Some(m) } else { find(&m.replies, id) })
}

/// Distinct sender first names across the whole tree, sorted.
pub fn participant_names(messages: &[DiscussionMessage]) -> Vec<String> {
    let mut names = Vec::new();
    collect_first_names(messages, &mut names);
    names.sort_by(|a: &String, b: &String| {
        a.to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b))
    });
    names.dedup();
    names
}

fn collect_first_names(messages: &[DiscussionMessage], out: &mut Vec<String>) {
    for message in messages {
        let first = message.sender_name.split(' ').next().unwrap_or_default().trim();
        if !first.is_empty() && !out.iter().any(|n| n == first) {
            out.push(first.to_string());
        }
        collect_first_names(&message.replies, out);
    }
}

/// Whitespace-delimited segments with runs collapsed, keeping a leading and
/// trailing empty segment when the draft starts or ends with whitespace.
fn segments(draft: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    if draft.starts_with(char::is_whitespace) {
        parts.push("");
    }
    parts.extend(draft.split_whitespace());
    if draft.is_empty() || draft.ends_with(char::is_whitespace) {
        parts.push("");
    }
    parts
}

/// Lowercased text after `@` in the trailing segment, if that segment is a
/// non-empty mention.
pub fn mention_token(draft: &str) -> Option<String> {
    let last = segments(draft).pop()?;
    let token = last.strip_prefix('@')?;
    if token.is_empty() {
        return None;
    }
    Some(token.to_lowercase())
}

/// Up to [`MAX_MENTION_SUGGESTIONS`] participant names matching the
/// trailing `@token` by case-insensitive prefix.
pub fn mention_suggestions(draft: &str, participants: &[String]) -> Vec<String> {
    let Some(token) = mention_token(draft) else {
        return Vec::new();
    };
    participants
        .iter()
        .filter(|name| name.to_lowercase().starts_with(&token))
        .take(MAX_MENTION_SUGGESTIONS)
        .cloned()
        .collect()
}

/// Replace the trailing segment with `@name` and leave the cursor after a
/// space, ready for the rest of the message.
pub fn replace_mention_token(draft: &str, name: &str) -> String {
    let mention = format!("@{name}");
    let mut parts = segments(draft);
    if let Some(last) = parts.last_mut() {
        *last = &mention;
    }
    format!("{} ", parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 2, 9, minute, 0).unwrap()
    }

    fn msg(
        id: i64,
        sender: &str,
        minute: u32,
        replies: Vec<DiscussionMessage>,
    ) -> DiscussionMessage {
        DiscussionMessage {
            id,
            parent_id: None,
            content: format!("message {id}"),
            sender_name: sender.into(),
            sender_avatar: None,
            created_at: at(minute),
            pinned: false,
            best_answer: false,
            replies,
        }
    }

    fn ids(messages: &[DiscussionMessage]) -> Vec<i64> {
        messages.iter().map(|m| m.id).collect()
    }

    #[test]
    fn sorts_each_level_ascending() {
        let mut tree = vec![
            msg(3, "C", 30, vec![msg(33, "x", 50, vec![]), msg(31, "y", 35, vec![])]),
            msg(1, "A", 10, vec![]),
            msg(
                2,
                "B",
                20,
                vec![
                    msg(23, "z", 59, vec![]),
                    msg(21, "z", 21, vec![]),
                    msg(22, "z", 40, vec![]),
                ],
            ),
        ];

        sort_ascending(&mut tree);

        assert_eq!(ids(&tree), vec![1, 2, 3]);
        assert_eq!(ids(&tree[1].replies), vec![21, 22, 23]);
        assert_eq!(ids(&tree[2].replies), vec![31, 33]);
    }

    #[test]
    fn equal_timestamps_keep_server_order() {
        let mut tree = vec![
            msg(5, "A", 10, vec![]),
            msg(4, "B", 10, vec![]),
            msg(6, "C", 10, vec![]),
        ];
        sort_ascending(&mut tree);
        assert_eq!(ids(&tree), vec![5, 4, 6]);
    }

    #[test]
    fn normalize_decodes_nested_content() {
        let mut reply = msg(2, "B", 5, vec![]);
        reply.content = r#"{"hello \"world\""}"#.into();
        let mut root = msg(1, "A", 1, vec![reply]);
        root.content = r#""plain""#.into();

        let tree = normalize(vec![root]);

        assert_eq!(tree[0].content, "plain");
        assert_eq!(tree[0].replies[0].content, r#"hello "world""#);
    }

    #[test]
    fn find_searches_replies() {
        let tree = vec![msg(1, "A", 1, vec![msg(2, "B", 2, vec![msg(3, "C", 3, vec![])])])];
        assert_eq!(find(&tree, 3).map(|m| m.id), Some(3));
        assert!(find(&tree, 4).is_none());
    }

    #[test]
    fn participants_are_distinct_sorted_first_names() {
        let tree = vec![
            msg(
                1,
                "Mark Twain",
                1,
                vec![msg(2, "john Smith", 2, vec![]), msg(3, "Joan Doe", 3, vec![])],
            ),
            msg(4, "Mark Other", 4, vec![]),
            msg(5, "", 5, vec![]),
        ];
        assert_eq!(participant_names(&tree), vec!["Joan", "john", "Mark"]);
    }

    #[test]
    fn mention_suggestions_prefix_match() {
        let participants: Vec<String> =
            ["Joan", "John", "Mark"].iter().map(|s| s.to_string()).collect();

        assert_eq!(mention_suggestions("Thanks @jo", &participants), vec!["Joan", "John"]);
        assert!(mention_suggestions("Thanks jo", &participants).is_empty());
        assert!(mention_suggestions("Thanks @jo ", &participants).is_empty());
        assert!(mention_suggestions("Thanks @", &participants).is_empty());
        assert_eq!(mention_suggestions("@M", &participants), vec!["Mark"]);
    }

    #[test]
    fn mention_suggestions_cap_at_six() {
        let participants: Vec<String> = (0..10).map(|i| format!("Sam{i}")).collect();
        assert_eq!(mention_suggestions("hi @sa", &participants).len(), MAX_MENTION_SUGGESTIONS);
    }

    #[test]
    fn mention_token_reads_last_segment() {
        assert_eq!(mention_token("a @Jo"), Some("jo".into()));
        assert_eq!(mention_token("@jo and"), None);
        assert_eq!(mention_token(""), None);
    }

    #[test]
    fn replace_mention_completes_trailing_token() {
        assert_eq!(replace_mention_token("Thanks @jo", "John"), "Thanks @John ");
        assert_eq!(replace_mention_token("Thanks   @jo", "John"), "Thanks @John ");
        assert_eq!(replace_mention_token("", "John"), "@John ");
    }
}
