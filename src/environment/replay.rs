//! 历史回放：抽取 (ToolCall, ToolMessage) 对并比较回放结果

use serde_json::Value;

use crate::core::{Result, SimError};
use crate::model::{Message, ToolCall, ToolMessage};

/// 按顺序抽取工具调用及其结果。
/// 带工具调用的消息之后必须紧跟每个调用各一条同 id 的 ToolMessage；
/// 唯一例外是历史的最后一条：它的调用尚未执行，不参与回放。
pub fn extract_tool_pairs(history: &[Message]) -> Result<Vec<(ToolCall, ToolMessage)>> {
    let mut pairs = Vec::new();
    let mut idx = 0;
    while idx < history.len() {
        match &history[idx] {
            Message::Tool(t) => return Err(SimError::UnexpectedToolMessage(t.id.clone())),
            msg if idx + 1 == history.len() && msg.is_tool_call() => break,
            msg => {
                let calls = msg.tool_calls();
                for (offset, call) in calls.iter().enumerate() {
                    let pos = idx + 1 + offset;
                    let response = history.get(pos).and_then(Message::as_tool).ok_or_else(|| {
                        SimError::MissingToolMessage(format!(
                            "tool call {} ({}) has no tool message at position {pos}",
                            call.id, call.name
                        ))
                    })?;
                    if response.id != call.id {
                        return Err(SimError::ToolCallIdMismatch {
                            call_id: call.id.clone(),
                            response_id: response.id.clone(),
                        });
                    }
                    pairs.push((call.clone(), response.clone()));
                }
                idx += 1 + calls.len();
            }
        }
    }
    Ok(pairs)
}

/// 两边都能解析为 JSON 时按结构比较，否则按原字符串比较
pub fn contents_match(returned: &str, expected: &str) -> bool {
    match (
        serde_json::from_str::<Value>(returned),
        serde_json::from_str::<Value>(expected),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => returned == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ParticipantMessage, ToolRequestor};
    use serde_json::json;

    fn calls(ids: &[&str]) -> Message {
        Message::Assistant(ParticipantMessage::tool_calls(
            ids.iter()
                .map(|id| ToolCall::new(*id, "get_users", json!({})))
                .collect(),
        ))
    }

    fn result(id: &str) -> Message {
        Message::Tool(ToolMessage::new(id, "[]", ToolRequestor::Assistant))
    }

    #[test]
    fn test_extract_pairs_in_order() {
        let history = vec![
            Message::User(ParticipantMessage::text("hi")),
            calls(&["1", "2"]),
            result("1"),
            result("2"),
            Message::Assistant(ParticipantMessage::text("done")),
        ];
        let pairs = extract_tool_pairs(&history).unwrap();
        let ids: Vec<_> = pairs.iter().map(|(c, _)| c.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_out_of_order_ids_fail() {
        let history = vec![calls(&["1", "2"]), result("2"), result("1")];
        assert!(matches!(
            extract_tool_pairs(&history),
            Err(SimError::ToolCallIdMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_and_unexpected_tool_messages() {
        let history = vec![calls(&["1", "2"]), result("1")];
        assert!(matches!(
            extract_tool_pairs(&history),
            Err(SimError::MissingToolMessage(_))
        ));
        let history = vec![calls(&["1"]), result("1"), result("9")];
        assert!(matches!(
            extract_tool_pairs(&history),
            Err(SimError::UnexpectedToolMessage(_))
        ));
    }

    #[test]
    fn test_trailing_pending_calls_are_skipped() {
        let history = vec![calls(&["1"]), result("1"), calls(&["2"])];
        let pairs = extract_tool_pairs(&history).unwrap();
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn test_contents_match_structural() {
        assert!(contents_match(r#"{"a":1,"b":2}"#, r#"{ "b": 2, "a": 1 }"#));
        assert!(!contents_match(r#"{"a":1}"#, r#"{"a":2}"#));
        assert!(contents_match("plain text", "plain text"));
        assert!(!contents_match("plain text", "other"));
    }
}
