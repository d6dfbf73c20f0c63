//! Message groups: the atomic unit of windowing and compression.
//!
//! An assistant turn that requests tool calls and the tool messages that
//! answer it form one group; every other message is a group of its own.
//! Windowing and compression keep or drop whole groups, so a tool result is
//! never separated from the call that produced it.

use crate::Message;
use std::collections::{HashMap, HashSet};
use std::ops::Range;

/// What kind of run a [`MessageGroup`] covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    /// A single system, user, or text-only assistant message.
    Single,
    /// An assistant message with tool calls plus the tool results that follow.
    ToolExchange,
    /// A tool message whose call is not in the transcript. Never kept.
    OrphanTool,
}

/// A contiguous run of messages that is kept or dropped as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageGroup {
    pub range: Range<usize>,
    pub kind: GroupKind,
}

impl MessageGroup {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// The group's messages within the list it was partitioned from.
    pub fn slice<'a>(&self, messages: &'a [Message]) -> &'a [Message] {
        &messages[self.range.clone()]
    }

    /// Whether the group starts with the given index.
    pub fn starts_at(&self, index: usize) -> bool {
        self.range.start == index
    }
}

/// Split a message list into groups, in order.
///
/// A tool exchange takes at most one result per call, so repeated or empty
/// call ids cannot pull unrelated tool messages into the group.
pub fn partition(messages: &[Message]) -> Vec<MessageGroup> {
    let mut groups = Vec::new();
    let mut i = 0;

    while i < messages.len() {
        let calls = messages[i].tool_calls();
        if !calls.is_empty() {
            let ids: HashSet<&str> = calls.iter().map(|c| c.id.as_str()).collect();
            let mut end = i + 1;
            while end < messages.len()
                && end - i <= calls.len()
                && messages[end]
                    .tool_call_id()
                    .is_some_and(|id| ids.contains(id))
            {
                end += 1;
            }
            groups.push(MessageGroup {
                range: i..end,
                kind: GroupKind::ToolExchange,
            });
            i = end;
        } else {
            let kind = if messages[i].is_tool() {
                GroupKind::OrphanTool
            } else {
                GroupKind::Single
            };
            groups.push(MessageGroup {
                range: i..i + 1,
                kind,
            });
            i += 1;
        }
    }

    groups
}

/// Call ids of the trailing assistant turn that have no tool result yet.
///
/// Non-empty while the loop is still appending results for the latest tool
/// exchange; budget management waits until this is empty. Results are
/// counted against calls, so two calls sharing an id (or both lacking one)
/// need two results.
pub fn pending_tool_calls(messages: &[Message]) -> Vec<String> {
    let Some(last) = partition(messages).pop() else {
        return Vec::new();
    };
    if last.kind != GroupKind::ToolExchange {
        return Vec::new();
    }
    let group = last.slice(messages);
    let mut answered: HashMap<&str, usize> = HashMap::new();
    for id in group[1..].iter().filter_map(|m| m.tool_call_id()) {
        *answered.entry(id).or_default() += 1;
    }
    group[0]
        .tool_calls()
        .iter()
        .filter(|c| match answered.get_mut(c.id.as_str()) {
            Some(n) if *n > 0 => {
                *n -= 1;
                false
            }
            _ => true,
        })
        .map(|c| c.id.clone())
        .collect()
}

/// The list without tool messages whose call is missing.
pub fn drop_orphans(messages: &[Message]) -> Vec<Message> {
    partition(messages)
        .iter()
        .filter(|g| g.kind != GroupKind::OrphanTool)
        .flat_map(|g| g.slice(messages).iter().cloned())
        .collect()
}

/// Check the transcript invariants: at most one system message, first if
/// present, and no tool message without its originating call in the list.
pub fn is_valid_transcript(messages: &[Message]) -> bool {
    let system_ok = messages
        .iter()
        .enumerate()
        .all(|(i, m)| !m.is_system() || i == 0);
    system_ok
        && partition(messages)
            .iter()
            .all(|g| g.kind != GroupKind::OrphanTool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;
    use serde_json::json;

    fn call(id: &str) -> ToolCall {
        ToolCall::function(id, "search", &json!({}))
    }

    fn exchange(ids: &[&str]) -> Vec<Message> {
        let mut msgs = vec![Message::assistant_tool_calls(
            None,
            ids.iter().map(|id| call(id)).collect(),
        )];
        msgs.extend(ids.iter().map(|id| Message::tool_result(*id, "search", "ok")));
        msgs
    }

    #[test]
    fn singles_and_exchanges() {
        let mut msgs = vec![Message::system("sys"), Message::user("q")];
        msgs.extend(exchange(&["a", "b"]));
        msgs.push(Message::user("reflect"));

        let groups = partition(&msgs);
        assert_eq!(groups.len(), 4);
        assert_eq!(groups[2].range, 2..5);
        assert_eq!(groups[2].kind, GroupKind::ToolExchange);
        assert_eq!(groups[3].kind, GroupKind::Single);
    }

    #[test]
    fn tool_message_without_call_is_orphan() {
        let msgs = vec![
            Message::user("q"),
            Message::tool_result("zzz", "search", "stray"),
        ];
        let groups = partition(&msgs);
        assert_eq!(groups[1].kind, GroupKind::OrphanTool);
        assert!(!is_valid_transcript(&msgs));
    }

    #[test]
    fn unrelated_tool_id_ends_the_group() {
        let mut msgs = exchange(&["a"]);
        msgs.push(Message::tool_result("other", "search", "late"));
        let groups = partition(&msgs);
        assert_eq!(groups[0].range, 0..2);
        assert_eq!(groups[1].kind, GroupKind::OrphanTool);
    }

    #[test]
    fn pending_calls_tracked_until_answered() {
        let mut msgs = vec![
            Message::user("q"),
            Message::assistant_tool_calls(None, vec![call("a"), call("b")]),
        ];
        assert_eq!(pending_tool_calls(&msgs), vec!["a", "b"]);

        msgs.push(Message::tool_result("a", "search", "ok"));
        assert_eq!(pending_tool_calls(&msgs), vec!["b"]);

        msgs.push(Message::tool_result("b", "search", "ok"));
        assert!(pending_tool_calls(&msgs).is_empty());
    }

    #[test]
    fn shared_and_empty_ids_count_per_call() {
        let mut msgs = vec![
            Message::user("q"),
            Message::assistant_tool_calls(None, vec![call(""), call(""), call("dup"), call("dup")]),
        ];
        assert_eq!(pending_tool_calls(&msgs).len(), 4);

        msgs.push(Message::tool_result("", "search", "ok"));
        msgs.push(Message::tool_result("dup", "search", "ok"));
        assert_eq!(pending_tool_calls(&msgs), vec!["", "dup"]);

        msgs.push(Message::tool_result("dup", "search", "ok"));
        msgs.push(Message::tool_result("", "search", "ok"));
        assert!(pending_tool_calls(&msgs).is_empty());
        assert!(is_valid_transcript(&msgs));
    }

    #[test]
    fn exchange_takes_one_result_per_call() {
        let mut msgs = exchange(&[""]);
        msgs.push(Message::tool_result("", "search", "extra"));
        let groups = partition(&msgs);
        assert_eq!(groups[0].range, 0..2);
        assert_eq!(groups[1].kind, GroupKind::OrphanTool);

        let cleaned = drop_orphans(&msgs);
        assert_eq!(cleaned.len(), 2);
        assert!(is_valid_transcript(&cleaned));
    }

    #[test]
    fn system_must_come_first() {
        let good = vec![Message::system("s"), Message::user("q")];
        let bad = vec![Message::user("q"), Message::system("s")];
        assert!(is_valid_transcript(&good));
        assert!(!is_valid_transcript(&bad));
    }
}
