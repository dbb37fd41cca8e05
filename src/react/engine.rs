//! AgentEngine：状态机的全部可变状态
//!
//! 状态、回合号、token 计数、消息历史与工具调用日志只在运行循环中经 `&mut self` 修改。
//! 本文件负责构造、快照、检查点序列化与恢复；回合推进见 loop_.rs。

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::{
    AgentError, AgentState, CheckpointManager, CheckpointStatus, PermissionGate, Recoverable,
    StateSnapshot, TokenCounters,
};
use crate::core::checkpoint::Checkpoint;
use crate::hooks::{EngineEvent, EventBus};
use crate::memory::Message;
use crate::react::planner::{Planner, ToolRequest};
use crate::tools::ToolExecutor;

/// 恢复回退到请求之前时，被丢下的待定调用的错误文本
pub const ABANDONED_BY_RECOVERY: &str = "abandoned by recovery";

/// 引擎参数
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_turns: u32,
    pub max_tokens: u32,
    /// 同一回合允许的连续恢复次数
    pub max_recovery_attempts: u32,
    pub system_prompt: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            max_tokens: 4096,
            max_recovery_attempts: 2,
            system_prompt: crate::config::DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl From<&crate::config::AgentSection> for EngineConfig {
    fn from(s: &crate::config::AgentSection) -> Self {
        Self {
            max_turns: s.max_turns,
            max_tokens: s.max_tokens,
            max_recovery_attempts: s.max_recovery_attempts,
            system_prompt: s.system_prompt.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Pending,
    Completed,
    Failed,
}

/// 工具调用日志条目：模型请求时创建，结束时更新一次；执行内只追加不删除
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
    pub status: ToolCallStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ToolCall {
    pub fn pending(request: &ToolRequest) -> Self {
        Self {
            id: request.id.clone(),
            name: request.name.clone(),
            input: request.input.clone(),
            status: ToolCallStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

/// 一次执行的最终结果；总带状态快照
#[derive(Clone, Debug, Serialize)]
pub struct RunResult {
    pub execution_id: String,
    pub status: RunStatus,
    pub response: Option<String>,
    pub snapshot: StateSnapshot,
    pub error: Option<String>,
}

/// 智能体执行引擎
pub struct AgentEngine {
    pub(super) planner: Planner,
    pub(super) executor: ToolExecutor,
    pub(super) gate: PermissionGate,
    pub(super) checkpoints: CheckpointManager,
    pub(super) events: EventBus,
    pub(super) config: EngineConfig,

    pub(super) state: AgentState,
    pub(super) turn: u32,
    pub(super) tokens: TokenCounters,
    pub(super) messages: Vec<Message>,
    pub(super) tool_calls: Vec<ToolCall>,
    /// 已由模型请求、尚未执行的工具调用（回合检查点记录它们，恢复后直接执行）
    pub(super) pending_tools: Vec<ToolRequest>,

    pub(super) execution_id: Option<String>,
    pub(super) started_at: Option<Instant>,
    pub(super) last_error: Option<String>,
    /// (失败回合, 已恢复次数)
    pub(super) recovery: Option<(u32, u32)>,
}

impl AgentEngine {
    pub fn new(
        planner: Planner,
        executor: ToolExecutor,
        gate: PermissionGate,
        checkpoints: CheckpointManager,
        events: EventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            planner,
            executor,
            gate,
            checkpoints,
            events,
            config,
            state: AgentState::Idle,
            turn: 0,
            tokens: TokenCounters::default(),
            messages: Vec::new(),
            tool_calls: Vec::new(),
            pending_tools: Vec::new(),
            execution_id: None,
            started_at: None,
            last_error: None,
            recovery: None,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn turn(&self) -> u32 {
        self.turn
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.execution_id.as_deref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn gate_mut(&mut self) -> &mut PermissionGate {
        &mut self.gate
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state: self.state,
            turn: self.turn,
            max_turns: self.config.max_turns,
            tokens: self.tokens,
            tool_call_count: self.tool_calls.len(),
            message_count: self.messages.len(),
            elapsed_ms: self
                .started_at
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or(0),
            last_error: self.last_error.clone(),
        }
    }

    /// 全量重置：状态、计数、历史、工具日志与会话级权限
    pub fn reset(&mut self) {
        self.set_state(AgentState::Idle);
        self.turn = 0;
        self.tokens = TokenCounters::default();
        self.messages.clear();
        self.tool_calls.clear();
        self.pending_tools.clear();
        self.execution_id = None;
        self.started_at = None;
        self.last_error = None;
        self.recovery = None;
        self.gate.clear_session();
        tracing::info!("engine reset");
    }

    pub(super) fn set_state(&mut self, to: AgentState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        tracing::debug!(%from, %to, "state transition");
        self.events.emit(EngineEvent::StateChanged { from, to });
    }

    /// 按当前引擎状态写一个检查点
    pub(super) fn write_checkpoint(&mut self, step_name: &str, step_index: f64) -> Result<(), AgentError> {
        let execution_id = self
            .execution_id
            .clone()
            .ok_or_else(|| AgentError::Checkpoint("no active execution".to_string()))?;
        let state = serde_json::to_value(self.snapshot())
            .map_err(|e| AgentError::Checkpoint(format!("serialize state: {e}")))?;
        let context = json!({ "messages": self.messages });
        let variables = json!({ "pending_tools": self.pending_tools });
        self.checkpoints.create_checkpoint(
            &execution_id,
            step_name,
            step_index,
            state,
            context,
            variables,
            CheckpointStatus::Success,
        )?;
        self.events.emit(EngineEvent::CheckpointWritten {
            step_name: step_name.to_string(),
            step_index,
        });
        Ok(())
    }
}

impl AgentEngine {
    /// 恢复后不会再执行的待定调用标记为失败；仍在待执行批次里的保持 Pending
    fn abandon_unrestored_calls(&mut self) {
        let AgentEngine {
            tool_calls,
            pending_tools,
            ..
        } = self;
        for call in tool_calls
            .iter_mut()
            .filter(|c| c.status == ToolCallStatus::Pending)
        {
            if pending_tools.iter().any(|p| p.id == call.id) {
                continue;
            }
            tracing::debug!(id = %call.id, tool = %call.name, "pending tool call abandoned by recovery");
            call.status = ToolCallStatus::Failed;
            call.error = Some(ABANDONED_BY_RECOVERY.to_string());
        }
    }
}

/// 恢复回合号、消息历史与待执行工具；token 计数不回滚，工具调用日志只收尾被放弃的待定条目
impl Recoverable for AgentEngine {
    fn restore_from_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), AgentError> {
        let snapshot: StateSnapshot = serde_json::from_value(checkpoint.state.clone())
            .map_err(|e| AgentError::Checkpoint(format!("decode state: {e}")))?;
        let messages: Vec<Message> = serde_json::from_value(
            checkpoint.context.get("messages").cloned().unwrap_or(Value::Null),
        )
        .map_err(|e| AgentError::Checkpoint(format!("decode messages: {e}")))?;
        let pending: Vec<ToolRequest> = match checkpoint.variables.get("pending_tools") {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| AgentError::Checkpoint(format!("decode pending tools: {e}")))?,
            None => Vec::new(),
        };

        self.turn = snapshot.turn;
        self.messages = messages;
        self.pending_tools = pending;
        self.abandon_unrestored_calls();
        let next = if self.pending_tools.is_empty() {
            AgentState::Thinking
        } else {
            AgentState::UsingTool
        };
        self.set_state(next);
        Ok(())
    }
}
