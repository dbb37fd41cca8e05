//! Agent 错误类型
//!
//! 只有模型调用失败、检查点不可用与回合超限会升级到 Error 终态；
//! 工具层错误在回合内以失败的 ToolResult 折回上下文，取消则走 TurnFlow::Cancelled，不属于错误。

use thiserror::Error;

use crate::llm::LlmError;

/// 引擎运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Turn limit exceeded: reached turn {turn} (max_turns = {max_turns})")]
    TurnLimitExceeded { turn: u32, max_turns: u32 },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// 同一回合内恢复次数耗尽或找不到可用检查点
    #[error("Recovery failed at step {step}: {reason}")]
    RecoveryFailed { step: f64, reason: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_limit_message_mentions_both_numbers() {
        let err = AgentError::TurnLimitExceeded { turn: 3, max_turns: 3 };
        let msg = err.to_string();
        assert!(msg.contains("turn 3"));
        assert!(msg.contains("max_turns = 3"));
    }

    #[test]
    fn test_llm_error_converts() {
        let err: AgentError = LlmError::InvalidResponse("empty choices".into()).into();
        assert!(matches!(err, AgentError::Llm(_)));
    }
}
