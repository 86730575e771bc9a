//! 仿真产出：SimulationRun、奖励明细与批量结果文件

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::Result;
use crate::model::{Action, EnvAssertion, Message, RewardType, Task};

/// 终止原因：done=true 时恰好设置其一
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    UserStop,
    AgentStop,
    MaxSteps,
    TooManyErrors,
}

impl TerminationReason {
    /// 预算耗尽（而非自愿结束）
    pub fn is_premature(&self) -> bool {
        matches!(self, TerminationReason::MaxSteps | TerminationReason::TooManyErrors)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DbCheck {
    pub db_match: bool,
    pub db_reward: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvAssertionCheck {
    pub env_assertion: EnvAssertion,
    pub met: bool,
    pub reward: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionCheck {
    pub action: Action,
    pub action_match: bool,
    pub action_reward: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommunicateCheck {
    pub info: String,
    pub met: bool,
}

/// 评估结果；reward 为各 reward_basis 分量之积
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RewardInfo {
    pub reward: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_check: Option<DbCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_assertions: Option<Vec<EnvAssertionCheck>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_checks: Option<Vec<ActionCheck>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub communicate_checks: Option<Vec<CommunicateCheck>>,
    #[serde(default)]
    pub reward_basis: Option<Vec<RewardType>>,
    #[serde(default)]
    pub reward_breakdown: Option<Vec<(RewardType, f64)>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
}

impl RewardInfo {
    pub fn with_note(reward: f64, note: impl Into<String>) -> Self {
        Self {
            reward,
            db_check: None,
            env_assertions: None,
            action_checks: None,
            communicate_checks: None,
            reward_basis: None,
            reward_breakdown: None,
            info: Some(serde_json::json!({ "note": note.into() })),
        }
    }
}

/// 一次 (task, trial) 仿真的不可变记录，只在 Orchestrator::run 结束时构造
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationRun {
    pub id: String,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// 秒
    pub duration: f64,
    pub termination_reason: TerminationReason,
    #[serde(default)]
    pub agent_cost: Option<f64>,
    #[serde(default)]
    pub user_cost: Option<f64>,
    #[serde(default)]
    pub reward_info: Option<RewardInfo>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub trial: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// 复现一批仿真所需的配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub domain: String,
    pub agent: String,
    pub user: String,
    pub num_trials: usize,
    pub max_steps: usize,
    pub max_errors: usize,
    pub seed: Option<u64>,
    pub solo_mode: bool,
    #[serde(default)]
    pub git_commit: Option<String>,
}

impl RunInfo {
    /// 从 GIT_COMMIT 环境变量读取提交号
    pub fn detect_git_commit() -> Option<String> {
        std::env::var("GIT_COMMIT")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// 结果文件：{timestamp, info, tasks, simulations}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Results {
    pub timestamp: DateTime<Utc>,
    pub info: RunInfo,
    pub tasks: Vec<Task>,
    pub simulations: Vec<SimulationRun>,
}

impl Results {
    pub fn new(info: RunInfo, tasks: Vec<Task>) -> Self {
        Self {
            timestamp: Utc::now(),
            info,
            tasks,
            simulations: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// 已完成的 (trial, task_id, seed)，续跑时跳过
    pub fn done_runs(&self) -> HashSet<(Option<usize>, String, Option<u64>)> {
        self.simulations
            .iter()
            .map(|s| (s.trial, s.task_id.clone(), s.seed))
            .collect()
    }

    /// 平均奖励；没有任何已评估仿真时为 None
    pub fn average_reward(&self) -> Option<f64> {
        let rewards: Vec<f64> = self
            .simulations
            .iter()
            .filter_map(|s| s.reward_info.as_ref().map(|r| r.reward))
            .collect();
        if rewards.is_empty() {
            return None;
        }
        Some(rewards.iter().sum::<f64>() / rewards.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParticipantMessage;

    fn info() -> RunInfo {
        RunInfo {
            domain: "mock".into(),
            agent: "scripted_agent".into(),
            user: "scripted_user".into(),
            num_trials: 1,
            max_steps: 10,
            max_errors: 3,
            seed: Some(300),
            solo_mode: false,
            git_commit: None,
        }
    }

    fn run(task_id: &str, trial: usize, reward: f64) -> SimulationRun {
        let now = Utc::now();
        SimulationRun {
            id: format!("{task_id}-{trial}"),
            task_id: task_id.into(),
            timestamp: now,
            start_time: now,
            end_time: now,
            duration: 0.0,
            termination_reason: TerminationReason::AgentStop,
            agent_cost: None,
            user_cost: None,
            reward_info: Some(RewardInfo::with_note(reward, "test")),
            messages: vec![Message::Assistant(ParticipantMessage::text("hi"))],
            trial: Some(trial),
            seed: Some(1),
        }
    }

    #[test]
    fn test_termination_reason_serde() {
        let v = serde_json::to_value(TerminationReason::TooManyErrors).unwrap();
        assert_eq!(v, "too_many_errors");
        assert!(TerminationReason::MaxSteps.is_premature());
        assert!(!TerminationReason::UserStop.is_premature());
    }

    #[test]
    fn test_results_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("results.json");
        let mut results = Results::new(info(), vec![Task::new("t1")]);
        results.simulations.push(run("t1", 0, 1.0));
        results.simulations.push(run("t1", 1, 0.0));
        results.save(&path).unwrap();

        let loaded = Results::load(&path).unwrap();
        assert_eq!(loaded.simulations.len(), 2);
        assert!(loaded
            .done_runs()
            .contains(&(Some(1), "t1".to_string(), Some(1))));
        assert_eq!(loaded.average_reward(), Some(0.5));
    }
}
