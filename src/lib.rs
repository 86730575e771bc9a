//! Bee Bench - 对话式 Agent 仿真基准
//!
//! 模块划分：
//! - **model**: 消息、任务、仿真结果等数据模型
//! - **tools**: 分侧工具注册表、状态合并与哈希
//! - **environment**: 工具分发、消息历史回放、断言
//! - **agent** / **user**: 参与方契约与脚本实现
//! - **core**: 轮转状态机、批量调度、关闭
//! - **evaluator**: 基于最终状态 / 动作 / 沟通的奖励
//! - **domains**: 内置领域（mock）
//! - **config** / **observability**: 配置加载与日志

pub mod agent;
pub mod config;
pub mod core;
pub mod domains;
pub mod environment;
pub mod evaluator;
pub mod model;
pub mod observability;
pub mod tools;
pub mod user;

pub use crate::core::{Orchestrator, OrchestratorConfig, Result, SimError};
pub use environment::Environment;
