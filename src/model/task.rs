//! 任务定义：初始状态、环境函数调用 / 断言、评估标准
//!
//! Task 由基准定义层提供，Orchestrator 与 Environment 只读不写。

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{Message, ToolCall, ToolRequestor};

/// 对 agent 或 user 环境的一次函数调用（不进入可见轨迹）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvFunctionCall {
    pub env_type: ToolRequestor,
    pub func_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl EnvFunctionCall {
    pub fn new(env_type: ToolRequestor, func_name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            env_type,
            func_name: func_name.into(),
            arguments,
        }
    }
}

impl fmt::Display for EnvFunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}({})",
            self.env_type,
            self.func_name,
            Value::Object(self.arguments.clone())
        )
    }
}

fn default_assert_value() -> bool {
    true
}

/// 断言：函数结果必须为 bool，并与 assert_value 比较
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvAssertion {
    #[serde(flatten)]
    pub call: EnvFunctionCall,
    #[serde(default = "default_assert_value")]
    pub assert_value: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl EnvAssertion {
    pub fn new(env_type: ToolRequestor, func_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call: EnvFunctionCall::new(env_type, func_name, arguments),
            assert_value: true,
            message: None,
        }
    }

    pub fn expecting(mut self, value: bool) -> Self {
        self.assert_value = value;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// 顺序执行列表中的一项：普通调用或断言
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnvStep {
    Call(EnvFunctionCall),
    Assertion(EnvAssertion),
}

/// 在回放前合并到两侧状态的种子数据
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InitializationData {
    #[serde(default)]
    pub agent_data: Option<Value>,
    #[serde(default)]
    pub user_data: Option<Value>,
}

/// 任务初始状态
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InitialState {
    #[serde(default)]
    pub initialization_data: Option<InitializationData>,
    #[serde(default)]
    pub initialization_actions: Option<Vec<EnvFunctionCall>>,
    /// 已发生过的对话，最后一条必须来自 user 或 agent（或工具结果）
    #[serde(default)]
    pub message_history: Option<Vec<Message>>,
    #[serde(default)]
    pub variables: Option<Map<String, Value>>,
}

/// 期望的 Agent / User 动作；按 compare_args（缺省为全部参数）与实际工具调用比较
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_id: String,
    #[serde(default)]
    pub requestor: ToolRequestor,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(default)]
    pub info: Option<String>,
    #[serde(default)]
    pub compare_args: Option<Vec<String>>,
}

impl Action {
    pub fn compare_with_tool_call(&self, tool_call: &ToolCall) -> bool {
        if self.name != tool_call.name {
            return false;
        }
        let keys: Vec<&String> = match &self.compare_args {
            Some(keys) => keys.iter().collect(),
            None => tool_call.arguments.keys().collect(),
        };
        if keys.is_empty() {
            return true;
        }
        let pick = |args: &Map<String, Value>| -> Map<String, Value> {
            args.iter()
                .filter(|(k, _)| keys.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        pick(&tool_call.arguments) == pick(&self.arguments)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardType {
    Db,
    EnvAssertion,
    NlAssertion,
    Action,
    Communicate,
}

fn default_reward_basis() -> Vec<RewardType> {
    vec![RewardType::Db, RewardType::Communicate]
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationCriteria {
    #[serde(default)]
    pub actions: Option<Vec<Action>>,
    #[serde(default)]
    pub env_assertions: Option<Vec<EnvAssertion>>,
    #[serde(default)]
    pub communicate_info: Option<Vec<String>>,
    #[serde(default)]
    pub nl_assertions: Option<Vec<String>>,
    #[serde(default = "default_reward_basis")]
    pub reward_basis: Vec<RewardType>,
}

impl Default for EvaluationCriteria {
    fn default() -> Self {
        Self {
            actions: None,
            env_assertions: None,
            communicate_info: None,
            nl_assertions: None,
            reward_basis: default_reward_basis(),
        }
    }
}

/// 发给用户模拟器的场景
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserScenario {
    #[serde(default)]
    pub persona: Option<String>,
    pub instructions: String,
}

/// 某个领域下的一个任务
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub user_scenario: UserScenario,
    /// solo 模式下交给 agent 的工单
    #[serde(default)]
    pub ticket: Option<String>,
    #[serde(default)]
    pub initial_state: Option<InitialState>,
    #[serde(default)]
    pub evaluation_criteria: Option<EvaluationCriteria>,
}

impl Task {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            user_scenario: UserScenario::default(),
            ticket: None,
            initial_state: None,
            evaluation_criteria: None,
        }
    }

    pub fn with_initial_state(mut self, state: InitialState) -> Self {
        self.initial_state = Some(state);
        self
    }

    pub fn with_criteria(mut self, criteria: EvaluationCriteria) -> Self {
        self.evaluation_criteria = Some(criteria);
        self
    }

    pub fn initialization_data(&self) -> Option<&InitializationData> {
        self.initial_state
            .as_ref()
            .and_then(|s| s.initialization_data.as_ref())
    }

    pub fn initialization_actions(&self) -> &[EnvFunctionCall] {
        self.initial_state
            .as_ref()
            .and_then(|s| s.initialization_actions.as_deref())
            .unwrap_or(&[])
    }

    pub fn message_history(&self) -> &[Message] {
        self.initial_state
            .as_ref()
            .and_then(|s| s.message_history.as_deref())
            .unwrap_or(&[])
    }
}
