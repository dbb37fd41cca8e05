//! 状态定义：AgentState、回合统计与对外快照
//!
//! AgentState 只由运行循环修改；StateSnapshot 是它的只读投影，随每次 RunResult 返回，
//! 也被写入检查点的 state 段，恢复时据此回填回合号与 token 计数。

use serde::{Deserialize, Serialize};

/// 引擎状态机的当前阶段
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    #[default]
    Idle,
    Thinking,
    UsingTool,
    /// 单个工具调用在途
    WaitingForResult,
    Completed,
    Error,
}

impl AgentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentState::Completed | AgentState::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Thinking => "thinking",
            AgentState::UsingTool => "using_tool",
            AgentState::WaitingForResult => "waiting_for_result",
            AgentState::Completed => "completed",
            AgentState::Error => "error",
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 累计 token 计数（全量重置前单调递增）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounters {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenCounters {
    pub fn add(&mut self, input: u64, output: u64) {
        self.input_tokens += input;
        self.output_tokens += output;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// 引擎状态快照（RunResult 与检查点共用）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub state: AgentState,
    pub turn: u32,
    pub max_turns: u32,
    pub tokens: TokenCounters,
    pub tool_call_count: usize,
    pub message_count: usize,
    pub elapsed_ms: u64,
    pub last_error: Option<String>,
}
