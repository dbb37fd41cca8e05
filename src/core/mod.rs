//! 核心层：错误、状态、取消、权限闸门、检查点与恢复、会话监管、引擎构建与主控循环

pub mod builder;
pub mod cancellation;
pub mod checkpoint;
pub mod error;
pub mod interrupt;
pub mod orchestrator;
pub mod permission;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use builder::{create_model_from_config, EngineBuilder};
pub use cancellation::CancellationSignal;
pub use checkpoint::{Checkpoint, CheckpointStatus};
pub use error::AgentError;
pub use interrupt::spawn_interrupt_listener;
pub use orchestrator::{run_orchestrator, spawn_orchestrator, Command, OrchestratorHandle};
pub use permission::{
    parse_prompt_answer, DenyPrompter, PermissionDecision, PermissionGate, PermissionMode,
    PermissionPrompter, PromptResponse, RiskLevel, StdinPrompter, ToolRule,
};
pub use recovery::{CheckpointManager, ExecutionResult, Recoverable};
pub use session_supervisor::{ExecutionHandle, SessionSupervisor};
pub use state::{AgentState, StateSnapshot, TokenCounters};
