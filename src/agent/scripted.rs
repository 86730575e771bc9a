//! 按脚本回复的确定性 Agent，用于演示与测试
//!
//! 第 n 次回复取 script[n]，n 由状态中已有的 assistant 消息数推出（开场白不计），
//! 因此从同一段历史重建的 Agent 会接着脚本往下走。脚本用完后发出停止哨兵。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::{is_visible_to_agent, ActorState, Agent, AGENT_STOP_TOKEN};
use crate::core::{Result, DEFAULT_FIRST_AGENT_MESSAGE};
use crate::model::{Message, ParticipantMessage, ToolCall, ToolRequestor};

/// 脚本中的一轮；JSON 形如 `{"text": ".."}` 或 `{"tool_calls": [["name", {..}]]}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedTurn {
    Text(String),
    ToolCalls(Vec<(String, Value)>),
}

impl ScriptedTurn {
    pub fn text(content: impl Into<String>) -> Self {
        ScriptedTurn::Text(content.into())
    }

    pub fn call(name: impl Into<String>, args: Value) -> Self {
        ScriptedTurn::ToolCalls(vec![(name.into(), args)])
    }

    pub fn calls(calls: Vec<(&str, Value)>) -> Self {
        ScriptedTurn::ToolCalls(
            calls
                .into_iter()
                .map(|(name, args)| (name.to_string(), args))
                .collect(),
        )
    }

    pub fn stop() -> Self {
        ScriptedTurn::Text(AGENT_STOP_TOKEN.to_string())
    }

    /// id_prefix 决定工具调用 id：`{id_prefix}_{i}`
    pub fn to_message(&self, id_prefix: &str, requestor: ToolRequestor) -> ParticipantMessage {
        match self {
            ScriptedTurn::Text(text) => ParticipantMessage::text(text.clone()),
            ScriptedTurn::ToolCalls(calls) => ParticipantMessage::tool_calls(
                calls
                    .iter()
                    .enumerate()
                    .map(|(i, (name, args))| {
                        ToolCall::new(format!("{id_prefix}_{i}"), name.clone(), args.clone())
                            .with_requestor(requestor)
                    })
                    .collect(),
            ),
        }
    }
}

pub struct ScriptedAgent {
    name: String,
    script: Vec<ScriptedTurn>,
    system_prompt: Option<String>,
    solo: bool,
    seed: Option<u64>,
    cost_per_message: Option<f64>,
}

impl ScriptedAgent {
    pub fn new(script: Vec<ScriptedTurn>) -> Self {
        Self {
            name: "scripted_agent".to_string(),
            script,
            system_prompt: None,
            solo: false,
            seed: None,
            cost_per_message: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn solo(mut self) -> Self {
        self.solo = true;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost_per_message = Some(cost);
        self
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    fn replies_given(state: &ActorState) -> usize {
        let greeting = matches!(
            state.messages.first(),
            Some(Message::Assistant(m)) if m.content.as_deref() == Some(DEFAULT_FIRST_AGENT_MESSAGE)
        );
        state.count_assistant() - usize::from(greeting)
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn init_state(&self, history: &[Message]) -> ActorState {
        ActorState {
            system_prompt: self.system_prompt.clone(),
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
            .extend(incoming.iter().filter(|m| is_visible_to_agent(m)).cloned());

        let prefix = format!("call_{}", state.messages.len());
        let mut reply = match self.script.get(Self::replies_given(state)) {
            Some(turn) => turn.to_message(&prefix, ToolRequestor::Assistant),
            None => ParticipantMessage::text(AGENT_STOP_TOKEN),
        };
        reply.cost = self.cost_per_message;
        state.messages.push(Message::Assistant(reply.clone()));
        Ok(reply)
    }

    fn set_seed(&mut self, seed: u64) {
        self.seed = Some(seed);
    }

    fn is_solo(&self) -> bool {
        self.solo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_follows_script_then_stops() {
        let agent = ScriptedAgent::new(vec![
            ScriptedTurn::call("get_users", json!({})),
            ScriptedTurn::text("Here you go"),
        ]);
        let greeting = Message::Assistant(ParticipantMessage::text(DEFAULT_FIRST_AGENT_MESSAGE));
        let mut state = agent.init_state(&[greeting]);

        let incoming = [Message::User(ParticipantMessage::text("list users"))];
        let first = agent.generate_next_message(&incoming, &mut state).await.unwrap();
        assert!(first.is_tool_call());
        assert_eq!(first.calls()[0].id, "call_2_0");

        let second = agent.generate_next_message(&[], &mut state).await.unwrap();
        assert_eq!(second.content.as_deref(), Some("Here you go"));

        let third = agent.generate_next_message(&[], &mut state).await.unwrap();
        assert!(agent.is_stop(&third));
    }

    #[tokio::test]
    async fn test_rebuilt_state_continues_script() {
        let agent = ScriptedAgent::new(vec![ScriptedTurn::text("one"), ScriptedTurn::text("two")]);
        let mut state = agent.init_state(&[]);
        agent.generate_next_message(&[], &mut state).await.unwrap();

        let mut rebuilt = agent.init_state(&state.messages);
        let next = agent.generate_next_message(&[], &mut rebuilt).await.unwrap();
        assert_eq!(next.content.as_deref(), Some("two"));
    }

    #[test]
    fn test_seed_is_recorded_in_state() {
        let mut agent = ScriptedAgent::new(vec![]);
        agent.set_seed(42);
        assert_eq!(agent.init_state(&[]).seed, Some(42));
    }
}
