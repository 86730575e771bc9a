//! 仿真错误类型
//!
//! SimError 是致命通道：协议违例、回放不一致、初始化失败等，直接中止本次仿真，不产出 SimulationRun。
//! 可恢复的工具执行错误见 `tools::ToolError`，由 Environment 转为 error=true 的 ToolMessage。

use thiserror::Error;

use crate::core::Role;
use crate::model::ToolRequestor;
use crate::tools::ToolError;

/// 仿真过程中的致命错误
#[derive(Error, Debug)]
pub enum SimError {
    /// ToolMessage 前没有待回答的 ToolCall
    #[error("Tool message not expected (id {0}); tool messages must follow a tool call")]
    UnexpectedToolMessage(String),

    #[error("Tool message expected: {0}")]
    MissingToolMessage(String),

    #[error("Tool call id mismatch: call {call_id}, response {response_id}")]
    ToolCallIdMismatch { call_id: String, response_id: String },

    #[error("Requestor mismatch: expected {expected}, got {got}")]
    RequestorMismatch {
        expected: ToolRequestor,
        got: ToolRequestor,
    },

    /// 回放时工具返回与记录不一致：环境不可复现
    #[error("Replay mismatch for tool call {call_id} ({name}): returned {returned}, expected {expected}")]
    ReplayMismatch {
        call_id: String,
        name: String,
        returned: String,
        expected: String,
    },

    #[error("Tool names overlap in solo mode: {0:?}")]
    SoloModeOverlap(Vec<String>),

    #[error("User messages are not allowed in solo mode")]
    UserMessageInSoloMode,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Invalid role transition: {from:?} -> {to:?}")]
    InvalidRoleTransition { from: Option<Role>, to: Option<Role> },

    #[error("{0} tools not available")]
    MissingToolKit(ToolRequestor),

    #[error("Function {func} not found in {env_type} tools")]
    UnknownFunction { env_type: ToolRequestor, func: String },

    /// 初始化动作 / 断言函数本身执行失败
    #[error("Env function {func} failed: {source}")]
    EnvFunction {
        func: String,
        #[source]
        source: ToolError,
    },

    #[error("Function {func} returned {got} instead of bool")]
    NonBooleanAssertion { func: String, got: String },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Actor error: {0}")]
    Actor(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Simulation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 使用 SimError 的 Result
pub type Result<T> = std::result::Result<T, SimError>;
