//! 用户模拟器契约
//!
//! 与 Agent 同构：可见消息 + 私有状态 → 下一条 user 消息。
//! solo 模式下使用 DummyUser，它永远不会被调用。

pub mod dummy;
pub mod scripted;

use async_trait::async_trait;

use crate::agent::ActorState;
use crate::core::Result;
use crate::model::{Message, ParticipantMessage, ToolRequestor};

pub use dummy::DummyUser;
pub use scripted::ScriptedUser;

pub const USER_STOP_TOKEN: &str = "###STOP###";
pub const TRANSFER_TOKEN: &str = "###TRANSFER###";
pub const OUT_OF_SCOPE_TOKEN: &str = "###OUT-OF-SCOPE###";

/// user 能看到：user 消息、assistant 的文本消息、user 发起的工具结果
pub fn is_visible_to_user(message: &Message) -> bool {
    match message {
        Message::User(_) => true,
        Message::Assistant(m) => !m.is_tool_call(),
        Message::Tool(t) => t.requestor == ToolRequestor::User,
    }
}

#[async_trait]
pub trait UserSimulator: Send + Sync {
    fn name(&self) -> &str;

    fn init_state(&self, history: &[Message]) -> ActorState {
        ActorState {
            system_prompt: None,
            messages: history.to_vec(),
            seed: None,
        }
    }

    async fn generate_next_message(
        &self,
        incoming: &[Message],
        state: &mut ActorState,
    ) -> Result<ParticipantMessage>;

    fn is_stop(&self, message: &ParticipantMessage) -> bool {
        let Some(content) = message.content.as_deref() else {
            return false;
        };
        [USER_STOP_TOKEN, TRANSFER_TOKEN, OUT_OF_SCOPE_TOKEN]
            .iter()
            .any(|token| content.contains(token))
    }

    fn set_seed(&mut self, _seed: u64) {}

    fn is_dummy(&self) -> bool {
        false
    }
}
