//! 对话消息：User / Assistant / Tool 三种消息与工具调用
//!
//! 轨迹中每条 ToolCall 必须紧跟一条同 id 的 ToolMessage；`validate_message_history` 在初始化回放前检查这一点。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{Result, SimError};

/// 工具调用的发起方，决定由哪个命名空间处理
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolRequestor {
    #[default]
    Assistant,
    User,
}

impl fmt::Display for ToolRequestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolRequestor::Assistant => write!(f, "assistant"),
            ToolRequestor::User => write!(f, "user"),
        }
    }
}

/// 单次工具调用：{id, name, arguments, requestor}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(default)]
    pub requestor: ToolRequestor,
}

impl ToolCall {
    /// arguments 非 object 时按空参数处理
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            requestor: ToolRequestor::Assistant,
        }
    }

    pub fn with_requestor(mut self, requestor: ToolRequestor) -> Self {
        self.requestor = requestor;
        self
    }

    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }
}

/// User / Assistant 消息体：文本与工具调用至少其一
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ParticipantMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_idx: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
}

impl ParticipantMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn has_text_content(&self) -> bool {
        self.content
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false)
    }

    /// 空列表视为没有工具调用
    pub fn is_tool_call(&self) -> bool {
        self.tool_calls
            .as_ref()
            .map(|calls| !calls.is_empty())
            .unwrap_or(false)
    }

    pub fn calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or(&[])
    }

    pub fn validate(&self, role: &str) -> Result<()> {
        if !(self.has_text_content() || self.is_tool_call()) {
            return Err(SimError::InvalidMessage(format!(
                "{role} message must have either content or tool calls"
            )));
        }
        Ok(())
    }
}

/// 比较时忽略 id / 时间戳 / 序号 / 费用
impl PartialEq for ParticipantMessage {
    fn eq(&self, other: &Self) -> bool {
        self.content == other.content && self.calls() == other.calls()
    }
}

/// 工具结果：id 与其回答的 ToolCall 相同
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolMessage {
    pub id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub requestor: ToolRequestor,
    #[serde(default)]
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_idx: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ToolMessage {
    pub fn new(id: impl Into<String>, content: impl Into<String>, requestor: ToolRequestor) -> Self {
        Self {
            id: id.into(),
            content: Some(content.into()),
            requestor,
            error: false,
            turn_idx: None,
            timestamp: None,
        }
    }

    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

impl PartialEq for ToolMessage {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.content == other.content
            && self.requestor == other.requestor
            && self.error == other.error
    }
}

/// 轨迹消息（按 role 打标签的和类型）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User(ParticipantMessage),
    Assistant(ParticipantMessage),
    Tool(ToolMessage),
}

impl Message {
    pub fn role_name(&self) -> &'static str {
        match self {
            Message::User(_) => "user",
            Message::Assistant(_) => "assistant",
            Message::Tool(_) => "tool",
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Message::User(m) | Message::Assistant(m) => m.content.as_deref(),
            Message::Tool(m) => m.content.as_deref(),
        }
    }

    /// 参与者消息返回其工具调用，Tool 消息返回空
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::User(m) | Message::Assistant(m) => m.calls(),
            Message::Tool(_) => &[],
        }
    }

    pub fn is_tool_call(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    pub fn as_tool(&self) -> Option<&ToolMessage> {
        match self {
            Message::Tool(m) => Some(m),
            _ => None,
        }
    }

    pub fn set_timestamp(&mut self, ts: DateTime<Utc>) {
        match self {
            Message::User(m) | Message::Assistant(m) => m.timestamp = Some(ts),
            Message::Tool(m) => m.timestamp = Some(ts),
        }
    }

    pub fn set_turn_idx(&mut self, idx: Option<usize>) {
        match self {
            Message::User(m) | Message::Assistant(m) => m.turn_idx = idx,
            Message::Tool(m) => m.turn_idx = idx,
        }
    }

    pub fn cost(&self) -> Option<f64> {
        match self {
            Message::User(m) | Message::Assistant(m) => m.cost,
            Message::Tool(_) => None,
        }
    }
}

/// 检查一段历史的结构：
/// - 参与者消息必须有文本或工具调用，且工具调用的 requestor 与消息角色一致
/// - n 个工具调用之后必须恰好跟 n 条 requestor 相同的 ToolMessage
pub fn validate_message_history(history: &[Message]) -> Result<()> {
    let mut expected = 0usize;
    let mut requestor: Option<ToolRequestor> = None;

    for msg in history {
        match msg {
            Message::User(m) | Message::Assistant(m) => {
                let role = match msg {
                    Message::User(_) => ToolRequestor::User,
                    _ => ToolRequestor::Assistant,
                };
                m.validate(msg.role_name())?;
                if expected > 0 {
                    return Err(SimError::MissingToolMessage(format!(
                        "{expected} tool messages are missing, got {} message",
                        msg.role_name()
                    )));
                }
                if m.is_tool_call() {
                    if let Some(call) = m.calls().iter().find(|c| c.requestor != role) {
                        return Err(SimError::RequestorMismatch {
                            expected: role,
                            got: call.requestor,
                        });
                    }
                    expected = m.calls().len();
                    requestor = Some(role);
                } else {
                    requestor = None;
                }
            }
            Message::Tool(t) => {
                let Some(expected_requestor) = requestor.filter(|_| expected > 0) else {
                    return Err(SimError::UnexpectedToolMessage(t.id.clone()));
                };
                if t.requestor != expected_requestor {
                    return Err(SimError::RequestorMismatch {
                        expected: expected_requestor,
                        got: t.requestor,
                    });
                }
                expected -= 1;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assistant_call(id: &str) -> Message {
        Message::Assistant(ParticipantMessage::tool_calls(vec![ToolCall::new(
            id,
            "create_task",
            json!({"user_id": "user_1"}),
        )]))
    }

    #[test]
    fn test_message_serde_tagged_by_role() {
        let msg = Message::User(ParticipantMessage::text("hi"));
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["role"], "user");
        assert_eq!(v["content"], "hi");

        let back: Message = serde_json::from_value(json!({
            "role": "tool", "id": "3", "content": "ok", "requestor": "user"
        }))
        .unwrap();
        let tool = back.as_tool().unwrap();
        assert_eq!(tool.requestor, ToolRequestor::User);
        assert!(!tool.error);
    }

    #[test]
    fn test_equality_ignores_timestamp() {
        let mut a = Message::Assistant(ParticipantMessage::text("same"));
        let b = Message::Assistant(ParticipantMessage::text("same"));
        a.set_timestamp(Utc::now());
        a.set_turn_idx(Some(4));
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_tool_calls_is_not_tool_call() {
        let m = ParticipantMessage {
            content: Some("x".into()),
            tool_calls: Some(vec![]),
            ..Default::default()
        };
        assert!(!m.is_tool_call());
    }

    #[test]
    fn test_validate_history_ok() {
        let history = vec![
            Message::User(ParticipantMessage::text("create it")),
            assistant_call("3"),
            Message::Tool(ToolMessage::new("3", "{}", ToolRequestor::Assistant)),
            Message::Assistant(ParticipantMessage::text("done")),
        ];
        assert!(validate_message_history(&history).is_ok());
    }

    #[test]
    fn test_validate_history_missing_tool_message() {
        let history = vec![
            assistant_call("3"),
            Message::Assistant(ParticipantMessage::text("done")),
        ];
        let err = validate_message_history(&history).unwrap_err();
        assert!(matches!(err, SimError::MissingToolMessage(_)));
    }

    #[test]
    fn test_validate_history_unexpected_tool_message() {
        let history = vec![Message::Tool(ToolMessage::new(
            "1",
            "x",
            ToolRequestor::Assistant,
        ))];
        assert!(matches!(
            validate_message_history(&history),
            Err(SimError::UnexpectedToolMessage(_))
        ));
    }

    #[test]
    fn test_validate_history_requestor_mismatch() {
        let history = vec![
            assistant_call("3"),
            Message::Tool(ToolMessage::new("3", "{}", ToolRequestor::User)),
        ];
        assert!(matches!(
            validate_message_history(&history),
            Err(SimError::RequestorMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_history_empty_message() {
        let history = vec![Message::Assistant(ParticipantMessage::default())];
        assert!(matches!(
            validate_message_history(&history),
            Err(SimError::InvalidMessage(_))
        ));
    }
}
