//! 按脚本发言的确定性用户
//!
//! 第 n 条 user 消息取 script[n]（n = 状态中已有的 user 消息数）；脚本用完后发出停止哨兵。

use async_trait::async_trait;

use crate::agent::{ActorState, ScriptedTurn};
use crate::core::Result;
use crate::model::{Message, ParticipantMessage, ToolRequestor};
use crate::user::{is_visible_to_user, UserSimulator, USER_STOP_TOKEN};

pub struct ScriptedUser {
    name: String,
    script: Vec<ScriptedTurn>,
    instructions: Option<String>,
    seed: Option<u64>,
    cost_per_message: Option<f64>,
}

impl ScriptedUser {
    pub fn new(script: Vec<ScriptedTurn>) -> Self {
        Self {
            name: "scripted_user".to_string(),
            script,
            instructions: None,
            seed: None,
            cost_per_message: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost_per_message = Some(cost);
        self
    }
}

#[async_trait]
impl UserSimulator for ScriptedUser {
    fn name(&self) -> &str {
        &self.name
    }

    fn init_state(&self, history: &[Message]) -> ActorState {
        ActorState {
            system_prompt: self.instructions.clone(),
            messages: history.to_vec(),
            seed: self.seed,
        }
    }

    async fn generate_next_message(
        &self,
        incoming: &[Message],
        state: &mut ActorState,
    ) -> Result<ParticipantMessage> {
        state
            .messages
            .extend(incoming.iter().filter(|m| is_visible_to_user(m)).cloned());

        let prefix = format!("user_call_{}", state.messages.len());
        let mut reply = match self.script.get(state.count_user()) {
            Some(turn) => turn.to_message(&prefix, ToolRequestor::User),
            None => ParticipantMessage::text(USER_STOP_TOKEN),
        };
        reply.cost = self.cost_per_message;
        state.messages.push(Message::User(reply.clone()));
        Ok(reply)
    }

    fn set_seed(&mut self, seed: u64) {
        self.seed = Some(seed);
    }
}
