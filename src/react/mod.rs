//! 执行层：Planner（调用模型并拆分回复）、AgentEngine（状态机）与回合运行循环

pub mod engine;
pub mod loop_;
pub mod planner;

pub use engine::{
    AgentEngine, EngineConfig, RunResult, RunStatus, ToolCall, ToolCallStatus, ABANDONED_BY_RECOVERY,
};
pub use loop_::TurnFlow;
pub use planner::{first_text, parse_response, tool_requests, Planner, Segment, ToolRequest};
