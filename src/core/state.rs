//! 编排状态：轮转角色与状态快照
//!
//! Orchestrator 内部持有完整状态；OrchestratorSnapshot 是供日志 / 断言使用的轻量投影。

use serde::{Deserialize, Serialize};

use crate::model::TerminationReason;

/// 对话参与方：AGENT / USER / ENV（工具执行层）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Agent,
    User,
    Env,
}

/// 编排器状态投影
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrchestratorSnapshot {
    pub from_role: Option<Role>,
    pub to_role: Option<Role>,
    pub step_count: usize,
    pub done: bool,
    pub termination_reason: Option<TerminationReason>,
    pub trajectory_len: usize,
    pub consecutive_tool_errors: usize,
}
