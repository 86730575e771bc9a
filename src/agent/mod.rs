//! Agent 契约
//!
//! Agent 是可插拔的策略：给定新到的消息与私有状态，产出下一条 assistant 消息。
//! Orchestrator 只依赖这个 trait；语言模型调用等细节都在实现内部。

pub mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::Result;
use crate::model::{Message, ParticipantMessage};

pub use scripted::{ScriptedAgent, ScriptedTurn};

/// 结束对话的哨兵
pub const AGENT_STOP_TOKEN: &str = "###STOP###";

/// 参与者私有状态：可见消息 + 系统提示 + 种子
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActorState {
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl ActorState {
    pub fn count_assistant(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| matches!(m, Message::Assistant(_)))
            .count()
    }

    pub fn count_user(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| matches!(m, Message::User(_)))
            .count()
    }
}

/// agent 能看到：assistant 消息、user 的文本消息、assistant 发起的工具结果
pub fn is_visible_to_agent(message: &Message) -> bool {
    match message {
        Message::Assistant(_) => true,
        Message::User(m) => !m.is_tool_call(),
        Message::Tool(t) => t.requestor == crate::model::ToolRequestor::Assistant,
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// 由已发生的对话构造初始状态；history 已由调用方按可见性过滤
    fn init_state(&self, history: &[Message]) -> ActorState {
        ActorState {
            system_prompt: None,
            messages: history.to_vec(),
            seed: None,
        }
    }

    /// 把 incoming 记入状态并产出回复（回复同样记入状态）。
    /// incoming 只有在 solo agent 发出第一条消息时为空。
    async fn generate_next_message(
        &self,
        incoming: &[Message],
        state: &mut ActorState,
    ) -> Result<ParticipantMessage>;

    fn is_stop(&self, message: &ParticipantMessage) -> bool {
        message
            .content
            .as_deref()
            .map(|c| c.contains(AGENT_STOP_TOKEN))
            .unwrap_or(false)
    }

    fn set_seed(&mut self, _seed: u64) {}

    fn is_solo(&self) -> bool {
        false
    }
}
