//! DB / ENV_ASSERTION 奖励
//!
//! 预测环境：在全新环境上回放整条轨迹；参照环境：由任务初始状态加上期望动作构造。
//! 两侧状态哈希都一致时 DB 奖励为 1；环境断言以非致命方式逐条执行。

use serde_json::Value;

use crate::core::Result;
use crate::environment::Environment;
use crate::model::{DbCheck, EnvAssertionCheck, EvaluationCriteria, Message, Task};

pub struct EnvEvaluation {
    pub db_check: DbCheck,
    pub env_assertions: Vec<EnvAssertionCheck>,
}

impl EnvEvaluation {
    pub fn assertion_reward(&self) -> f64 {
        self.env_assertions.iter().map(|c| c.reward).product()
    }
}

pub async fn evaluate_env<F>(
    messages: &[Message],
    task: &Task,
    criteria: &EvaluationCriteria,
    solo_mode: bool,
    make_env: F,
) -> Result<EnvEvaluation>
where
    F: Fn() -> Result<Environment>,
{
    let mut predicted = make_env()?;
    predicted.set_solo_mode(solo_mode)?;
    predicted
        .set_state(
            task.initialization_data(),
            task.initialization_actions(),
            messages,
        )
        .await?;

    let mut gold = make_env()?;
    gold.set_solo_mode(solo_mode)?;
    gold.set_state(
        task.initialization_data(),
        task.initialization_actions(),
        task.message_history(),
    )
    .await?;
    for action in criteria.actions.iter().flatten() {
        let result = gold
            .make_tool_call(
                &action.name,
                action.requestor,
                Value::Object(action.arguments.clone()),
            )
            .await;
        if let Err(e) = result {
            tracing::warn!(action = %action.action_id, error = %e, "gold action failed");
        }
    }
    gold.sync_tools();

    let db_match = predicted.check_db(&gold)?;
    let db_check = DbCheck {
        db_match,
        db_reward: if db_match { 1.0 } else { 0.0 },
    };

    let mut env_assertions = Vec::new();
    for assertion in criteria.env_assertions.iter().flatten() {
        let met = predicted.run_env_assertion(assertion, false).await?;
        env_assertions.push(EnvAssertionCheck {
            env_assertion: assertion.clone(),
            met,
            reward: if met { 1.0 } else { 0.0 },
        });
    }

    Ok(EnvEvaluation {
        db_check,
        env_assertions,
    })
}
