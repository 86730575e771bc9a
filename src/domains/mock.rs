//! mock 领域：极简任务管理
//!
//! assistant 侧持有用户与任务表；user 侧只知道自己的 id、位置和镜像过来的任务状态。
//! 每次工具调用后 `MockSync` 对账：用户位置写回 assistant 侧，任务状态同步到 user 侧。

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agent::{Agent, ScriptedAgent, ScriptedTurn};
use crate::core::{Result, SimError, SimulationFactory};
use crate::environment::{Environment, ToolSync};
use crate::model::{
    Action, EnvAssertion, EvaluationCriteria, RewardType, Task, ToolRequestor, UserScenario,
};
use crate::tools::{
    json_result, params_schema, parse_args, FnTool, ToolError, ToolKind, ToolKit, ToolRegistry,
};
use crate::user::{DummyUser, ScriptedUser, UserSimulator};

pub const DOMAIN_NAME: &str = "mock";

pub const MOCK_POLICY: &str = "You are a task management assistant. \
Only create or update tasks for users that exist. \
Confirm the task id to the user after creating a task. \
Transfer to a human agent when the request is out of scope.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TaskStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// assistant 侧状态
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MockDb {
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskRecord>,
    #[serde(default)]
    pub users: BTreeMap<String, UserRecord>,
}

/// user 侧状态
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MockUserDb {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub task_statuses: BTreeMap<String, TaskStatus>,
}

#[derive(Deserialize, JsonSchema)]
struct CreateTaskArgs {
    /// 任务所属用户
    user_id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
struct UpdateTaskStatusArgs {
    task_id: String,
    status: TaskStatus,
}

#[derive(Deserialize, JsonSchema)]
struct TransferArgs {
    /// 转人工的原因摘要
    summary: String,
}

#[derive(Deserialize, JsonSchema)]
struct ThinkArgs {
    thought: String,
}

#[derive(Deserialize, JsonSchema)]
struct CheckStatusArgs {
    task_id: String,
}

#[derive(Deserialize, JsonSchema)]
struct SetUserLocationArgs {
    location: String,
}

#[derive(Deserialize)]
struct NumberOfTasksArgs {
    user_id: String,
    expected_number: usize,
}

#[derive(Deserialize)]
struct TaskStatusArgs {
    task_id: String,
    expected_status: TaskStatus,
}

#[derive(Deserialize)]
struct UserLocationArgs {
    location: String,
}

fn initial_db() -> MockDb {
    let mut db = MockDb::default();
    db.tasks.insert(
        "task_1".into(),
        TaskRecord {
            task_id: "task_1".into(),
            title: "Important Meeting".into(),
            description: Some("Quarterly planning".into()),
            status: TaskStatus::Pending,
        },
    );
    db.users.insert(
        "user_1".into(),
        UserRecord {
            user_id: "user_1".into(),
            name: "John Doe".into(),
            tasks: vec!["task_1".into()],
            location: None,
        },
    );
    db.users.insert(
        "user_2".into(),
        UserRecord {
            user_id: "user_2".into(),
            name: "Jane Smith".into(),
            tasks: vec![],
            location: None,
        },
    );
    db
}

/// assistant 侧工具与断言函数
pub fn assistant_tools() -> ToolRegistry<MockDb> {
    ToolRegistry::new(initial_db())
        .with_tool(
            FnTool::new("create_task", "Create a new task for a user.", |db: &mut MockDb, args: &Value| {
                let args: CreateTaskArgs = parse_args(args)?;
                let user = db
                    .users
                    .get_mut(&args.user_id)
                    .ok_or_else(|| ToolError::Execution(format!("User {} not found", args.user_id)))?;
                let task_id = format!("task_{}", db.tasks.len() + 1);
                user.tasks.push(task_id.clone());
                let record = TaskRecord {
                    task_id: task_id.clone(),
                    title: args.title,
                    description: args.description,
                    status: TaskStatus::Pending,
                };
                db.tasks.insert(task_id, record.clone());
                json_result(record)
            })
            .kind(ToolKind::Write)
            .schema(params_schema::<CreateTaskArgs>()),
        )
        .with_tool(
            FnTool::new(
                "update_task_status",
                "Update the status of an existing task.",
                |db: &mut MockDb, args: &Value| {
                    let args: UpdateTaskStatusArgs = parse_args(args)?;
                    let task = db
                        .tasks
                        .get_mut(&args.task_id)
                        .ok_or_else(|| ToolError::Execution(format!("Task {} not found", args.task_id)))?;
                    task.status = args.status;
                    json_result(task.clone())
                },
            )
            .kind(ToolKind::Write)
            .schema(params_schema::<UpdateTaskStatusArgs>()),
        )
        .with_tool(FnTool::new("get_users", "List all users.", |db: &mut MockDb, _: &Value| {
            json_result(db.users.values().cloned().collect::<Vec<_>>())
        }))
        .with_tool(
            FnTool::new(
                "transfer_to_human_agents",
                "Transfer the user to a human agent with a summary of the issue.",
                |_: &mut MockDb, args: &Value| {
                    let _args: TransferArgs = parse_args(args)?;
                    json_result("Transfer successful")
                },
            )
            .kind(ToolKind::Generic)
            .schema(params_schema::<TransferArgs>()),
        )
        .with_tool(
            FnTool::new("think", "Think about the next step. No side effects.", |_: &mut MockDb, args: &Value| {
                let _args: ThinkArgs = parse_args(args)?;
                json_result("")
            })
            .kind(ToolKind::Think)
            .schema(params_schema::<ThinkArgs>()),
        )
        .with_function("assert_number_of_tasks", |db: &mut MockDb, args: &Value| {
            let args: NumberOfTasksArgs = parse_args(args)?;
            let count = db
                .users
                .get(&args.user_id)
                .map(|u| u.tasks.len())
                .ok_or_else(|| ToolError::Execution(format!("User {} not found", args.user_id)))?;
            Ok(Value::Bool(count == args.expected_number))
        })
        .with_function("assert_task_status", |db: &mut MockDb, args: &Value| {
            let args: TaskStatusArgs = parse_args(args)?;
            let task = db
                .tasks
                .get(&args.task_id)
                .ok_or_else(|| ToolError::Execution(format!("Task {} not found", args.task_id)))?;
            Ok(Value::Bool(task.status == args.expected_status))
        })
}

/// user 侧工具与断言函数
pub fn user_tools() -> ToolRegistry<MockUserDb> {
    let db = MockUserDb {
        user_id: Some("user_1".into()),
        ..Default::default()
    };
    ToolRegistry::new(db)
        .with_tool(
            FnTool::new("check_status", "Check the status of one of your tasks.", |db: &mut MockUserDb, args: &Value| {
                let args: CheckStatusArgs = parse_args(args)?;
                let status = db
                    .task_statuses
                    .get(&args.task_id)
                    .ok_or_else(|| ToolError::Execution(format!("Task {} not found", args.task_id)))?;
                json_result(status)
            })
            .schema(params_schema::<CheckStatusArgs>()),
        )
        .with_tool(
            FnTool::new("set_user_location", "Set your current location.", |db: &mut MockUserDb, args: &Value| {
                let args: SetUserLocationArgs = parse_args(args)?;
                db.location = Some(args.location.clone());
                json_result(format!("Location set to {}", args.location))
            })
            .kind(ToolKind::Write)
            .schema(params_schema::<SetUserLocationArgs>()),
        )
        .with_function("assert_user_location", |db: &mut MockUserDb, args: &Value| {
            let args: UserLocationArgs = parse_args(args)?;
            Ok(Value::Bool(db.location.as_deref() == Some(args.location.as_str())))
        })
}

/// 两侧镜像状态对账
pub struct MockSync;

impl ToolSync for MockSync {
    fn sync(
        &self,
        tools: Option<&mut Box<dyn ToolKit>>,
        user_tools: Option<&mut Box<dyn ToolKit>>,
    ) {
        let (Some(tools), Some(user_tools)) = (tools, user_tools) else {
            return;
        };
        let Some(agent) = tools.as_any_mut().downcast_mut::<ToolRegistry<MockDb>>() else {
            return;
        };
        let Some(user) = user_tools.as_any_mut().downcast_mut::<ToolRegistry<MockUserDb>>() else {
            return;
        };
        let Some(user_id) = user.db().user_id.clone() else {
            return;
        };

        let location = user.db().location.clone();
        let db = agent.db_mut();
        let statuses: BTreeMap<String, TaskStatus> = match db.users.get_mut(&user_id) {
            Some(record) => {
                record.location = location;
                record
                    .tasks
                    .iter()
                    .filter_map(|id| db.tasks.get(id).map(|t| (id.clone(), t.status)))
                    .collect()
            }
            None => BTreeMap::new(),
        };
        user.db_mut().task_statuses = statuses;
    }
}

/// 全新的 mock 环境
pub fn get_environment(solo_mode: bool) -> Result<Environment> {
    let mut env = Environment::new(
        DOMAIN_NAME,
        MOCK_POLICY,
        Some(Box::new(assistant_tools())),
        Some(Box::new(user_tools())),
    )
    .with_sync(MockSync);
    env.set_solo_mode(solo_mode)?;
    env.sync_tools();
    Ok(env)
}

/// 一个任务及驱动它的脚本
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub task: Task,
    #[serde(default)]
    pub agent_script: Vec<ScriptedTurn>,
    #[serde(default)]
    pub user_script: Vec<ScriptedTurn>,
}

pub fn demo_scenarios() -> Vec<Scenario> {
    let create_task = Task {
        description: Some("User asks to create a task".into()),
        user_scenario: UserScenario {
            persona: None,
            instructions: "You are user_1. Ask for a task titled 'Buy groceries'.".into(),
        },
        evaluation_criteria: Some(EvaluationCriteria {
            actions: Some(vec![Action {
                action_id: "create_task_0".into(),
                requestor: ToolRequestor::Assistant,
                name: "create_task".into(),
                arguments: json!({"user_id": "user_1", "title": "Buy groceries"})
                    .as_object()
                    .cloned()
                    .unwrap_or_default(),
                info: None,
                compare_args: None,
            }]),
            env_assertions: Some(vec![EnvAssertion::new(
                ToolRequestor::Assistant,
                "assert_number_of_tasks",
                json!({"user_id": "user_1", "expected_number": 2}),
            )]),
            communicate_info: Some(vec!["task_2".into()]),
            nl_assertions: None,
            reward_basis: vec![RewardType::Db, RewardType::EnvAssertion, RewardType::Communicate],
        }),
        ..Task::new("create_task_1")
    };

    let complete_task = Task {
        description: Some("User completes a task and checks it".into()),
        user_scenario: UserScenario {
            persona: None,
            instructions: "You are user_1. Mark task_1 as completed, then check it yourself.".into(),
        },
        evaluation_criteria: Some(EvaluationCriteria {
            actions: Some(vec![Action {
                action_id: "update_0".into(),
                requestor: ToolRequestor::Assistant,
                name: "update_task_status".into(),
                arguments: json!({"task_id": "task_1", "status": "completed"})
                    .as_object()
                    .cloned()
                    .unwrap_or_default(),
                info: None,
                compare_args: None,
            }]),
            env_assertions: Some(vec![EnvAssertion::new(
                ToolRequestor::Assistant,
                "assert_task_status",
                json!({"task_id": "task_1", "expected_status": "completed"}),
            )]),
            communicate_info: None,
            nl_assertions: None,
            reward_basis: vec![RewardType::Db, RewardType::Action],
        }),
        ..Task::new("complete_task_1")
    };

    vec![
        Scenario {
            task: create_task,
            agent_script: vec![
                ScriptedTurn::call("create_task", json!({"user_id": "user_1", "title": "Buy groceries"})),
                ScriptedTurn::text("I created task_2 for you."),
            ],
            user_script: vec![
                ScriptedTurn::text("Please create a task called 'Buy groceries' for user_1."),
                ScriptedTurn::text("Thanks! ###STOP###"),
            ],
        },
        Scenario {
            task: complete_task,
            agent_script: vec![
                ScriptedTurn::call("update_task_status", json!({"task_id": "task_1", "status": "completed"})),
                ScriptedTurn::text("task_1 is now completed."),
            ],
            user_script: vec![
                ScriptedTurn::text("Please mark task_1 as completed."),
                ScriptedTurn::call("check_status", json!({"task_id": "task_1"})),
                ScriptedTurn::text("Confirmed, thanks. ###STOP###"),
            ],
        },
    ]
}

/// 使用脚本参与方的 mock 工厂
pub struct MockFactory {
    scenarios: BTreeMap<String, Scenario>,
}

impl MockFactory {
    pub fn new(scenarios: Vec<Scenario>) -> Self {
        Self {
            scenarios: scenarios
                .into_iter()
                .map(|s| (s.task.id.clone(), s))
                .collect(),
        }
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.scenarios.values().map(|s| s.task.clone()).collect()
    }

    fn scenario(&self, task: &Task) -> Result<&Scenario> {
        self.scenarios
            .get(&task.id)
            .ok_or_else(|| SimError::Actor(format!("no script for task {}", task.id)))
    }
}

impl SimulationFactory for MockFactory {
    fn environment(&self, solo_mode: bool) -> Result<Environment> {
        get_environment(solo_mode)
    }

    fn agent(&self, environment: &Environment, task: &Task) -> Result<Box<dyn Agent>> {
        let scenario = self.scenario(task)?;
        let prompt = format!(
            "<policy>\n{}\n</policy>\n<tools>\n{}\n</tools>",
            environment.policy(),
            environment.tools_description(ToolRequestor::Assistant)
        );
        let mut agent = ScriptedAgent::new(scenario.agent_script.clone()).with_system_prompt(prompt);
        if environment.solo_mode() {
            agent = agent.solo();
        }
        Ok(Box::new(agent))
    }

    fn user(&self, environment: &Environment, task: &Task) -> Result<Box<dyn UserSimulator>> {
        if environment.solo_mode() {
            return Ok(Box::new(DummyUser));
        }
        let scenario = self.scenario(task)?;
        Ok(Box::new(
            ScriptedUser::new(scenario.user_script.clone())
                .with_instructions(task.user_scenario.instructions.clone()),
        ))
    }

    fn agent_name(&self) -> String {
        "scripted_agent".to_string()
    }

    fn user_name(&self) -> String {
        "scripted_user".to_string()
    }
}
