//! 仿真评估
//!
//! 在 SimulationRun 完成后计算奖励：预算耗尽记 0，没有评估标准记 1，
//! 否则按 reward_basis 逐项计算（DB、ENV_ASSERTION、ACTION、COMMUNICATE）后相乘。

pub mod action;
pub mod communicate;
pub mod env;

use crate::core::Result;
use crate::environment::Environment;
use crate::model::{RewardInfo, RewardType, SimulationRun, Task};

pub use action::{action_reward, evaluate_actions};
pub use communicate::{communicate_reward, evaluate_communicate};
pub use env::{evaluate_env, EnvEvaluation};

pub async fn evaluate_simulation<F>(
    run: &SimulationRun,
    task: &Task,
    solo_mode: bool,
    make_env: F,
) -> Result<RewardInfo>
where
    F: Fn() -> Result<Environment>,
{
    if run.termination_reason.is_premature() {
        return Ok(RewardInfo::with_note(
            0.0,
            format!("simulation terminated prematurely: {:?}", run.termination_reason),
        ));
    }
    let Some(criteria) = &task.evaluation_criteria else {
        return Ok(RewardInfo::with_note(1.0, "no evaluation criteria"));
    };

    let basis = &criteria.reward_basis;
    let mut info = RewardInfo {
        reward: 1.0,
        db_check: None,
        env_assertions: None,
        action_checks: None,
        communicate_checks: None,
        reward_basis: Some(basis.clone()),
        reward_breakdown: None,
        info: None,
    };
    let mut breakdown = Vec::new();

    if basis.contains(&RewardType::Db) || basis.contains(&RewardType::EnvAssertion) {
        let env_eval = evaluate_env(&run.messages, task, criteria, solo_mode, make_env).await?;
        if basis.contains(&RewardType::Db) {
            breakdown.push((RewardType::Db, env_eval.db_check.db_reward));
        }
        if basis.contains(&RewardType::EnvAssertion) {
            breakdown.push((RewardType::EnvAssertion, env_eval.assertion_reward()));
        }
        info.db_check = Some(env_eval.db_check);
        info.env_assertions = Some(env_eval.env_assertions);
    }

    if basis.contains(&RewardType::Action) {
        let checks = evaluate_actions(&run.messages, criteria.actions.as_deref().unwrap_or(&[]));
        breakdown.push((RewardType::Action, action_reward(&checks)));
        info.action_checks = Some(checks);
    }

    if basis.contains(&RewardType::Communicate) {
        let checks = evaluate_communicate(
            &run.messages,
            criteria.communicate_info.as_deref().unwrap_or(&[]),
        );
        breakdown.push((RewardType::Communicate, communicate_reward(&checks)));
        info.communicate_checks = Some(checks);
    }

    if basis.contains(&RewardType::NlAssertion) {
        // 自然语言断言需要评审模型，这里不计分
        info.info = Some(serde_json::json!({"note": "nl assertions are not evaluated"}));
    }

    info.reward = breakdown.iter().map(|(_, r)| r).product();
    info.reward_breakdown = Some(breakdown);
    tracing::debug!(task_id = %task.id, reward = info.reward, "simulation evaluated");
    Ok(info)
}
