//! 轮转编排器：AGENT / USER / ENV 三方状态机
//!
//! 每次 `step()` 恰好完成一次转移：
//! - 轮到 AGENT / USER：向对应参与者要一条消息并追加到轨迹；带工具调用则交给 ENV，否则交给对方
//! - 轮到 ENV：逐个执行工具调用，按顺序追加 ToolMessage，然后把控制权交还发起方
//!
//! 终止：参与者发出停止哨兵（AGENT_STOP / USER_STOP）优先；其后依次检查连续工具错误预算与步数预算。
//! `done` 之后的 `step()` 是空操作。

use std::time::Instant;

use chrono::Utc;

use crate::agent::{is_visible_to_agent, ActorState, Agent};
use crate::core::{OrchestratorSnapshot, Result, Role, SimError};
use crate::environment::Environment;
use crate::model::{
    validate_message_history, Message, ParticipantMessage, SimulationRun, Task,
    TerminationReason, ToolRequestor,
};
use crate::user::{is_visible_to_user, UserSimulator};

/// 无历史时由编排器合成的开场白
pub const DEFAULT_FIRST_AGENT_MESSAGE: &str = "Hi! How can I help you today?";

/// 单次仿真的预算与模式
#[derive(Clone, Debug, PartialEq)]
pub struct OrchestratorConfig {
    pub max_steps: usize,
    pub max_errors: usize,
    pub seed: Option<u64>,
    pub solo_mode: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            max_errors: 10,
            seed: None,
            solo_mode: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(SimError::InvalidConfig("max_steps must be positive".into()));
        }
        if self.max_errors == 0 {
            return Err(SimError::InvalidConfig("max_errors must be positive".into()));
        }
        Ok(())
    }
}

pub struct Orchestrator {
    agent: Box<dyn Agent>,
    user: Box<dyn UserSimulator>,
    environment: Environment,
    task: Task,
    config: OrchestratorConfig,
    trial: Option<usize>,

    initialized: bool,
    from_role: Option<Role>,
    to_role: Option<Role>,
    step_count: usize,
    done: bool,
    termination_reason: Option<TerminationReason>,
    trajectory: Vec<Message>,
    message: Option<Message>,
    /// 下一位行动者要接收的消息：上一条参与者消息，或上一批 ToolMessage
    pending: Vec<Message>,
    agent_state: ActorState,
    user_state: ActorState,
    consecutive_tool_errors: usize,
}

impl Orchestrator {
    pub fn new(
        mut agent: Box<dyn Agent>,
        mut user: Box<dyn UserSimulator>,
        environment: Environment,
        task: Task,
        config: OrchestratorConfig,
    ) -> Self {
        if let Some(seed) = config.seed {
            agent.set_seed(seed);
            user.set_seed(seed);
        }
        Self {
            agent,
            user,
            environment,
            task,
            config,
            trial: None,
            initialized: false,
            from_role: None,
            to_role: None,
            step_count: 0,
            done: false,
            termination_reason: None,
            trajectory: Vec::new(),
            message: None,
            pending: Vec::new(),
            agent_state: ActorState::default(),
            user_state: ActorState::default(),
            consecutive_tool_errors: 0,
        }
    }

    /// 标记所属 trial，写入 SimulationRun
    pub fn with_trial(mut self, trial: usize) -> Self {
        self.trial = Some(trial);
        self
    }

    /// 准备初始状态：校验配置与 solo 约束，将种子数据 / 初始化动作 / 历史回放到环境，
    /// 再按历史（或开场白）设置角色与双方状态。
    pub async fn initialize(&mut self) -> Result<()> {
        self.config.validate()?;

        if self.config.solo_mode {
            if !self.agent.is_solo() {
                return Err(SimError::InvalidConfig(format!(
                    "solo mode requires a solo agent, got {}",
                    self.agent.name()
                )));
            }
            if !self.user.is_dummy() {
                return Err(SimError::InvalidConfig(format!(
                    "solo mode requires a dummy user, got {}",
                    self.user.name()
                )));
            }
            self.environment.set_solo_mode(true)?;
        } else if self.agent.is_solo() {
            return Err(SimError::InvalidConfig(format!(
                "agent {} only runs in solo mode",
                self.agent.name()
            )));
        }

        let history = self.task.message_history().to_vec();
        validate_message_history(&history)?;
        self.environment
            .set_state(
                self.task.initialization_data(),
                self.task.initialization_actions(),
                &history,
            )
            .await?;

        if history.is_empty() {
            self.start_fresh();
        } else {
            self.resume_from(history)?;
        }
        self.initialized = true;

        tracing::info!(
            task_id = %self.task.id,
            domain = %self.environment.domain_name(),
            solo_mode = self.config.solo_mode,
            history_len = self.trajectory.len(),
            "simulation initialized"
        );
        Ok(())
    }

    fn start_fresh(&mut self) {
        self.user_state = self.user.init_state(&[]);
        if self.config.solo_mode {
            // solo agent 自己发出第一条消息
            self.agent_state = self.agent.init_state(&[]);
            self.from_role = None;
            self.to_role = Some(Role::Agent);
            return;
        }

        let mut greeting = Message::Assistant(
            ParticipantMessage::text(DEFAULT_FIRST_AGENT_MESSAGE).with_id(self.next_message_id()),
        );
        greeting.set_timestamp(Utc::now());
        self.agent_state = self.agent.init_state(std::slice::from_ref(&greeting));
        self.trajectory.push(greeting.clone());
        self.pending = vec![greeting.clone()];
        self.message = Some(greeting);
        self.from_role = Some(Role::Agent);
        self.to_role = Some(Role::User);
    }

    /// 从已有历史接续：最后一条（或末尾的一批 ToolMessage）是下一位行动者的输入，
    /// 不计入接收方的初始状态。
    fn resume_from(&mut self, history: Vec<Message>) -> Result<()> {
        let Some(last) = history.last().cloned() else {
            return Ok(());
        };
        let pending_len = match &last {
            Message::Tool(_) => history
                .iter()
                .rev()
                .take_while(|m| matches!(m, Message::Tool(_)))
                .count(),
            _ => 1,
        };
        let split = history.len() - pending_len;

        let (from, to) = match &last {
            Message::Assistant(m) if m.is_tool_call() => (Role::Agent, Role::Env),
            Message::Assistant(_) => (Role::Agent, Role::User),
            Message::User(m) if m.is_tool_call() => (Role::User, Role::Env),
            Message::User(_) => (Role::User, Role::Agent),
            Message::Tool(t) => (Role::Env, requestor_role(t.requestor)),
        };

        let agent_end = if to == Role::Agent { split } else { history.len() };
        let user_end = if to == Role::User { split } else { history.len() };
        let agent_visible: Vec<Message> = history[..agent_end]
            .iter()
            .filter(|m| is_visible_to_agent(m))
            .cloned()
            .collect();
        let user_visible: Vec<Message> = history[..user_end]
            .iter()
            .filter(|m| is_visible_to_user(m))
            .cloned()
            .collect();
        self.agent_state = self.agent.init_state(&agent_visible);
        self.user_state = self.user.init_state(&user_visible);

        self.from_role = Some(from);
        self.to_role = Some(to);
        self.pending = history[split..].to_vec();
        self.message = Some(last.clone());
        let (errors, budget_hit) = replay_error_budget(&history, self.config.max_errors);
        self.consecutive_tool_errors = errors;
        self.trajectory = history;

        match &last {
            Message::Assistant(m) if self.agent.is_stop(m) => {
                self.finish(TerminationReason::AgentStop);
            }
            Message::User(m) if self.user.is_stop(m) => {
                self.finish(TerminationReason::UserStop);
            }
            Message::Assistant(m) if self.config.solo_mode && !m.is_tool_call() => {
                return Err(SimError::InvalidRoleTransition {
                    from: Some(Role::Agent),
                    to: Some(Role::User),
                });
            }
            Message::Tool(_) if budget_hit => {
                self.finish(TerminationReason::TooManyErrors);
            }
            _ => {}
        }
        Ok(())
    }

    /// 执行一次转移；已结束时为空操作
    pub async fn step(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        let to_role = match (self.initialized, self.to_role) {
            (true, Some(role)) => role,
            _ => {
                return Err(SimError::InvalidRoleTransition {
                    from: self.from_role,
                    to: self.to_role,
                })
            }
        };

        match to_role {
            Role::Agent | Role::User => self.participant_turn(to_role).await?,
            Role::Env => self.env_turn().await?,
        }
        self.step_count += 1;

        if !self.done {
            if self.consecutive_tool_errors >= self.config.max_errors {
                self.finish(TerminationReason::TooManyErrors);
            } else if self.step_count >= self.config.max_steps {
                self.finish(TerminationReason::MaxSteps);
            }
        }

        tracing::debug!(
            step = self.step_count,
            from = ?self.from_role,
            to = ?self.to_role,
            errors = self.consecutive_tool_errors,
            done = self.done,
            "step"
        );
        Ok(())
    }

    async fn participant_turn(&mut self, role: Role) -> Result<()> {
        let incoming = std::mem::take(&mut self.pending);
        let (mut reply, stop) = match role {
            Role::Agent => {
                let reply = self
                    .agent
                    .generate_next_message(&incoming, &mut self.agent_state)
                    .await?;
                let stop = self.agent.is_stop(&reply);
                (reply, stop)
            }
            _ => {
                if self.user.is_dummy() {
                    return Err(SimError::InvalidRoleTransition {
                        from: self.from_role,
                        to: Some(Role::User),
                    });
                }
                let reply = self
                    .user
                    .generate_next_message(&incoming, &mut self.user_state)
                    .await?;
                let stop = self.user.is_stop(&reply);
                (reply, stop)
            }
        };

        let requestor = match role {
            Role::User => ToolRequestor::User,
            _ => ToolRequestor::Assistant,
        };
        let msg_id = reply.id.clone().unwrap_or_else(|| self.next_message_id());
        if let Some(calls) = reply.tool_calls.as_mut() {
            for (i, call) in calls.iter_mut().enumerate() {
                call.requestor = requestor;
                if call.id.is_empty() {
                    call.id = format!("{msg_id}_call_{i}");
                }
            }
        }
        reply.id = Some(msg_id);
        reply.timestamp = Some(Utc::now());
        reply.validate(role_label(role))?;
        let is_tool_call = reply.is_tool_call();
        if stop && is_tool_call {
            // 停止消息不能留下未回答的工具调用
            return Err(SimError::InvalidMessage(format!(
                "{} stop message carries {} tool calls",
                role_label(role),
                reply.calls().len()
            )));
        }

        let message = match role {
            Role::User => Message::User(reply),
            _ => Message::Assistant(reply),
        };

        self.trajectory.push(message.clone());
        self.message = Some(message.clone());
        self.from_role = Some(role);

        if stop {
            self.to_role = None;
            self.finish(match role {
                Role::User => TerminationReason::UserStop,
                _ => TerminationReason::AgentStop,
            });
            return Ok(());
        }

        if is_tool_call {
            self.to_role = Some(Role::Env);
        } else {
            self.consecutive_tool_errors = 0;
            let next = match role {
                Role::Agent => Role::User,
                _ => Role::Agent,
            };
            if self.config.solo_mode && next == Role::User {
                return Err(SimError::InvalidRoleTransition {
                    from: Some(role),
                    to: Some(next),
                });
            }
            self.to_role = Some(next);
        }
        self.pending = vec![message];
        Ok(())
    }

    async fn env_turn(&mut self) -> Result<()> {
        let requests = std::mem::take(&mut self.pending);
        let calls = requests
            .last()
            .map(|m| m.tool_calls().to_vec())
            .unwrap_or_default();
        let requestor = match requests.last() {
            Some(Message::User(_)) => ToolRequestor::User,
            _ => ToolRequestor::Assistant,
        };
        if calls.is_empty() {
            return Err(SimError::InvalidRoleTransition {
                from: self.from_role,
                to: Some(Role::Env),
            });
        }

        let mut budget_hit = false;
        let mut batch = Vec::with_capacity(calls.len());
        for call in &calls {
            let mut response = self.environment.get_response(call).await;
            response.timestamp = Some(Utc::now());
            if response.error {
                self.consecutive_tool_errors += 1;
            } else {
                self.consecutive_tool_errors = 0;
            }
            if self.consecutive_tool_errors >= self.config.max_errors {
                budget_hit = true;
            }
            let message = Message::Tool(response);
            self.trajectory.push(message.clone());
            batch.push(message);
        }

        self.message = batch.last().cloned();
        self.pending = batch;
        self.from_role = Some(Role::Env);
        self.to_role = Some(requestor_role(requestor));
        if budget_hit {
            self.finish(TerminationReason::TooManyErrors);
        }
        Ok(())
    }

    fn finish(&mut self, reason: TerminationReason) {
        self.done = true;
        self.termination_reason = Some(reason);
        tracing::info!(
            task_id = %self.task.id,
            reason = ?reason,
            steps = self.step_count,
            "simulation finished"
        );
    }

    fn next_message_id(&self) -> String {
        format!("msg_{}", self.trajectory.len())
    }

    /// 运行到结束并产出 SimulationRun（必要时先初始化）
    pub async fn run(&mut self) -> Result<SimulationRun> {
        let start_time = Utc::now();
        let clock = Instant::now();
        if !self.initialized {
            self.initialize().await?;
        }
        while !self.done {
            self.step().await?;
        }
        let end_time = Utc::now();
        let termination_reason = self.termination_reason.ok_or(SimError::InvalidRoleTransition {
            from: self.from_role,
            to: self.to_role,
        })?;

        Ok(SimulationRun {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: self.task.id.clone(),
            timestamp: end_time,
            start_time,
            end_time,
            duration: clock.elapsed().as_secs_f64(),
            termination_reason,
            agent_cost: sum_costs(&self.trajectory, |m| matches!(m, Message::Assistant(_))),
            user_cost: sum_costs(&self.trajectory, |m| matches!(m, Message::User(_))),
            reward_info: None,
            messages: self.get_trajectory(),
            trial: self.trial,
            seed: self.config.seed,
        })
    }

    /// 轨迹副本，turn_idx 按位置编号
    pub fn get_trajectory(&self) -> Vec<Message> {
        self.trajectory
            .iter()
            .enumerate()
            .map(|(idx, m)| {
                let mut m = m.clone();
                m.set_turn_idx(Some(idx));
                m
            })
            .collect()
    }

    /// 当前角色、步数与预算计数的可序列化快照
    pub fn snapshot(&self) -> OrchestratorSnapshot {
        OrchestratorSnapshot {
            from_role: self.from_role,
            to_role: self.to_role,
            step_count: self.step_count,
            done: self.done,
            termination_reason: self.termination_reason,
            trajectory_len: self.trajectory.len(),
            consecutive_tool_errors: self.consecutive_tool_errors,
        }
    }

    /// 是否已终止
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// 终止原因；未结束时为 None
    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.termination_reason
    }

    /// 已执行的非空操作步数
    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// 轨迹中最后一条消息
    pub fn last_message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    /// 借用轨迹（turn_idx 未编号，需要编号时用 get_trajectory）
    pub fn trajectory(&self) -> &[Message] {
        &self.trajectory
    }

    /// agent 的私有状态
    pub fn agent_state(&self) -> &ActorState {
        &self.agent_state
    }

    /// 用户模拟器的私有状态
    pub fn user_state(&self) -> &ActorState {
        &self.user_state
    }

    /// 借用环境，用于检查状态哈希
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// 当前任务
    pub fn task(&self) -> &Task {
        &self.task
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        _ => "assistant",
    }
}

/// 按 step 的计数规则顺序重放历史，得到连续工具错误数，以及最后一批结果是否触及预算
fn replay_error_budget(history: &[Message], max_errors: usize) -> (usize, bool) {
    let mut errors = 0;
    let mut budget_hit = false;
    for message in history {
        match message {
            Message::Tool(t) => {
                errors = if t.error { errors + 1 } else { 0 };
                if errors >= max_errors {
                    budget_hit = true;
                }
            }
            m if m.is_tool_call() => budget_hit = false,
            _ => {
                errors = 0;
                budget_hit = false;
            }
        }
    }
    (errors, budget_hit)
}

fn requestor_role(requestor: ToolRequestor) -> Role {
    match requestor {
        ToolRequestor::Assistant => Role::Agent,
        ToolRequestor::User => Role::User,
    }
}

fn sum_costs(trajectory: &[Message], pick: impl Fn(&Message) -> bool) -> Option<f64> {
    let costs: Vec<f64> = trajectory
        .iter()
        .filter(|m| pick(*m))
        .filter_map(Message::cost)
        .collect();
    (!costs.is_empty()).then(|| costs.iter().sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ScriptedAgent, ScriptedTurn, AGENT_STOP_TOKEN};
    use crate::model::{ToolCall, ToolMessage};
    use crate::tools::{json_result, FnTool, ToolError, ToolRegistry};
    use crate::user::{DummyUser, ScriptedUser};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    /// 一边发停止哨兵一边调用工具
    struct StopWithCall;

    #[async_trait]
    impl Agent for StopWithCall {
        fn name(&self) -> &str {
            "stop_with_call"
        }

        async fn generate_next_message(
            &self,
            _incoming: &[Message],
            _state: &mut ActorState,
        ) -> Result<ParticipantMessage> {
            let mut reply =
                ParticipantMessage::tool_calls(vec![ToolCall::new("c1", "bump", json!({}))]);
            reply.content = Some(AGENT_STOP_TOKEN.to_string());
            Ok(reply)
        }
    }

    fn environment() -> Environment {
        let tools = ToolRegistry::new(0i64)
            .with_tool(FnTool::new("bump", "count", |n: &mut i64, _: &Value| {
                *n += 1;
                json_result(*n)
            }))
            .with_tool(FnTool::new("fail", "fails", |_: &mut i64, _: &Value| {
                Err(ToolError::Execution("boom".into()))
            }));
        Environment::new("unit", "", Some(Box::new(tools)), None)
    }

    fn orchestrator(agent: ScriptedAgent, user: ScriptedUser, config: OrchestratorConfig) -> Orchestrator {
        Orchestrator::new(
            Box::new(agent),
            Box::new(user),
            environment(),
            Task::new("unit"),
            config,
        )
    }

    #[tokio::test]
    async fn test_initialize_without_history_greets() {
        let mut orch = orchestrator(
            ScriptedAgent::new(vec![]),
            ScriptedUser::new(vec![ScriptedTurn::text("hi")]),
            OrchestratorConfig::default(),
        );
        orch.initialize().await.unwrap();
        let snap = orch.snapshot();
        assert_eq!(snap.from_role, Some(Role::Agent));
        assert_eq!(snap.to_role, Some(Role::User));
        assert_eq!(snap.step_count, 0);
        assert_eq!(orch.trajectory().len(), 1);
        assert_eq!(orch.trajectory()[0].content(), Some(DEFAULT_FIRST_AGENT_MESSAGE));
    }

    #[tokio::test]
    async fn test_step_before_initialize_fails() {
        let mut orch = orchestrator(
            ScriptedAgent::new(vec![]),
            ScriptedUser::new(vec![]),
            OrchestratorConfig::default(),
        );
        assert!(matches!(
            orch.step().await,
            Err(SimError::InvalidRoleTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_env_returns_control_to_requestor() {
        let mut orch = orchestrator(
            ScriptedAgent::new(vec![ScriptedTurn::call("bump", json!({})), ScriptedTurn::text("done")]),
            ScriptedUser::new(vec![ScriptedTurn::text("bump it")]),
            OrchestratorConfig::default(),
        );
        orch.initialize().await.unwrap();
        orch.step().await.unwrap(); // user
        orch.step().await.unwrap(); // agent -> tool call
        assert_eq!(orch.snapshot().to_role, Some(Role::Env));
        orch.step().await.unwrap(); // env
        let snap = orch.snapshot();
        assert_eq!(snap.from_role, Some(Role::Env));
        assert_eq!(snap.to_role, Some(Role::Agent));
        let tool = orch.trajectory()[3].as_tool().unwrap();
        assert_eq!(tool.id, "call_2_0");
        assert_eq!(tool.content_str(), "1");
    }

    #[tokio::test]
    async fn test_voluntary_stop_is_not_overwritten_by_max_steps() {
        let mut orch = orchestrator(
            ScriptedAgent::new(vec![]),
            ScriptedUser::new(vec![ScriptedTurn::stop()]),
            OrchestratorConfig {
                max_steps: 1,
                ..Default::default()
            },
        );
        let run = orch.run().await.unwrap();
        assert_eq!(run.termination_reason, TerminationReason::UserStop);
        assert_eq!(orch.step_count(), 1);
    }

    #[tokio::test]
    async fn test_step_after_done_is_noop() {
        let mut orch = orchestrator(
            ScriptedAgent::new(vec![]),
            ScriptedUser::new(vec![ScriptedTurn::stop()]),
            OrchestratorConfig::default(),
        );
        orch.run().await.unwrap();
        let before = orch.snapshot();
        orch.step().await.unwrap();
        assert_eq!(orch.snapshot(), before);
    }

    #[tokio::test]
    async fn test_errors_within_one_batch_terminate_after_batch() {
        let mut orch = orchestrator(
            ScriptedAgent::new(vec![ScriptedTurn::calls(vec![
                ("fail", json!({})),
                ("fail", json!({})),
                ("bump", json!({})),
            ])]),
            ScriptedUser::new(vec![ScriptedTurn::text("go")]),
            OrchestratorConfig {
                max_errors: 2,
                ..Default::default()
            },
        );
        orch.run().await.unwrap();
        assert_eq!(orch.termination_reason(), Some(TerminationReason::TooManyErrors));
        // greeting, user, agent calls, 3 tool results
        assert_eq!(orch.trajectory().len(), 6);
        assert_eq!(orch.snapshot().consecutive_tool_errors, 0);
    }

    #[tokio::test]
    async fn test_solo_requires_solo_agent_and_dummy_user() {
        let mut orch = orchestrator(
            ScriptedAgent::new(vec![]),
            ScriptedUser::new(vec![]),
            OrchestratorConfig {
                solo_mode: true,
                ..Default::default()
            },
        );
        assert!(matches!(orch.initialize().await, Err(SimError::InvalidConfig(_))));

        let mut orch = Orchestrator::new(
            Box::new(ScriptedAgent::new(vec![ScriptedTurn::call("bump", json!({}))]).solo()),
            Box::new(DummyUser),
            environment(),
            Task::new("solo"),
            OrchestratorConfig {
                solo_mode: true,
                ..Default::default()
            },
        );
        orch.initialize().await.unwrap();
        assert!(orch.trajectory().is_empty());
        assert_eq!(orch.snapshot().to_role, Some(Role::Agent));
        let run = orch.run().await.unwrap();
        assert_eq!(run.termination_reason, TerminationReason::AgentStop);
        // call, result, stop
        assert_eq!(run.messages.len(), 3);
    }

    #[tokio::test]
    async fn test_costs_are_summed_per_side() {
        let mut orch = orchestrator(
            ScriptedAgent::new(vec![ScriptedTurn::text("a")]).with_cost(0.5),
            ScriptedUser::new(vec![ScriptedTurn::text("u")]),
            OrchestratorConfig::default(),
        );
        let run = orch.run().await.unwrap();
        // 用户第二轮即停止，agent 只回复了 "a"
        assert_eq!(run.termination_reason, TerminationReason::UserStop);
        assert_eq!(run.agent_cost, Some(0.5));
        assert_eq!(run.user_cost, None);
        assert!(run
            .messages
            .iter()
            .enumerate()
            .all(|(i, m)| match m {
                Message::User(p) | Message::Assistant(p) => p.turn_idx == Some(i),
                Message::Tool(t) => t.turn_idx == Some(i),
            }));
    }

    #[tokio::test]
    async fn test_stop_message_with_tool_calls_is_rejected() {
        let mut orch = Orchestrator::new(
            Box::new(StopWithCall),
            Box::new(ScriptedUser::new(vec![ScriptedTurn::text("go")])),
            environment(),
            Task::new("unit"),
            OrchestratorConfig::default(),
        );
        let err = orch.run().await.unwrap_err();
        assert!(matches!(err, SimError::InvalidMessage(_)));
        // 违规消息不进入轨迹
        assert_eq!(orch.trajectory().len(), 2);
        assert!(!orch.is_done());
    }

    #[test]
    fn test_replay_error_budget_follows_step_rules() {
        let err = |id: &str| {
            let mut t = ToolMessage::new(id, "Error: boom", ToolRequestor::Assistant);
            t.error = true;
            Message::Tool(t)
        };
        let call = |id: &str| {
            Message::Assistant(ParticipantMessage::tool_calls(vec![ToolCall::new(id, "fail", json!({}))]))
        };
        let ok = |id: &str| Message::Tool(ToolMessage::new(id, "1", ToolRequestor::Assistant));
        let text = Message::User(ParticipantMessage::text("hm"));

        let history = vec![call("a"), err("a"), call("b"), err("b")];
        assert_eq!(replay_error_budget(&history, 3), (2, false));
        assert_eq!(replay_error_budget(&history, 2), (2, true));

        let history = vec![call("a"), err("a"), text.clone(), call("b"), err("b")];
        assert_eq!(replay_error_budget(&history, 3), (1, false));

        let history = vec![call("a"), err("a"), call("b"), ok("b")];
        assert_eq!(replay_error_budget(&history, 3), (0, false));

        // 预算在批内触及后，即使批尾成功也算触及
        let batch = Message::Assistant(ParticipantMessage::tool_calls(vec![
            ToolCall::new("x", "fail", json!({})),
            ToolCall::new("y", "fail", json!({})),
            ToolCall::new("z", "bump", json!({})),
        ]));
        let history = vec![batch, err("x"), err("y"), ok("z")];
        assert_eq!(replay_error_budget(&history, 2), (0, true));
    }

    #[test]
    fn test_config_rejects_zero_budgets() {
        let cfg = OrchestratorConfig {
            max_steps: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = OrchestratorConfig {
            max_errors: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
