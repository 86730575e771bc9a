//! 核心编排层：错误、状态投影、轮转状态机、批量调度与关闭

pub mod error;
pub mod orchestrator;
pub mod shutdown;
pub mod state;
pub mod task_scheduler;

pub use error::{Result, SimError};
pub use orchestrator::{Orchestrator, OrchestratorConfig, DEFAULT_FIRST_AGENT_MESSAGE};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{OrchestratorSnapshot, Role};
pub use task_scheduler::{run_single, trial_seeds, BatchConfig, BatchReport, BatchRunner, SimulationFactory};
