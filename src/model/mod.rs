//! 数据模型：消息、任务与仿真产出

pub mod message;
pub mod simulation;
pub mod task;

pub use message::{validate_message_history, Message, ParticipantMessage, ToolCall, ToolMessage, ToolRequestor};
pub use simulation::{
    ActionCheck, CommunicateCheck, DbCheck, EnvAssertionCheck, Results, RewardInfo, RunInfo,
    SimulationRun, TerminationReason,
};
pub use task::{
    Action, EnvAssertion, EnvFunctionCall, EnvStep, EvaluationCriteria, InitialState,
    InitializationData, RewardType, Task, UserScenario,
};
