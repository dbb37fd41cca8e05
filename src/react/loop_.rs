//! 运行循环
//!
//! 用户输入 -> (回合号 +1，超限则 Error) -> 调用模型 -> 拆分回复 ->
//! 无工具调用则 Completed；否则逐个经权限闸门与执行协调器顺序执行，结果折回上下文，回到 Thinking。
//! 回合边界捕获模型调用 / 检查点错误，交给检查点管理器恢复；取消不是错误，执行结束后回到 Idle。

use std::time::Instant;

use uuid::Uuid;

use crate::core::{AgentError, AgentState, CancellationSignal, PermissionDecision};
use crate::hooks::EngineEvent;
use crate::memory::{ContentBlock, Message, Role};
use crate::react::engine::{AgentEngine, RunResult, RunStatus, ToolCall, ToolCallStatus};
use crate::react::planner::{first_text, parse_response, tool_requests, ToolRequest};
use crate::tools::{ToolOutcome, ToolResult};

/// 工具结果预览最大字符数
const RESULT_PREVIEW_CHARS: usize = 200;

/// 单个回合的走向；取消作为值返回，不走错误通道
#[derive(Debug)]
pub enum TurnFlow {
    Continue,
    Completed(String),
    Cancelled(String),
}

/// 一次执行的收尾方式
enum Finished {
    Completed(String),
    Cancelled(String),
}

/// 单个工具调用在批次中的结局
enum ToolStep {
    Folded(ContentBlock),
    Cancelled(String),
}

impl AgentEngine {
    /// 以新的执行 id 与取消信号运行一次
    pub async fn run(&mut self, input: &str) -> RunResult {
        let execution_id = Uuid::new_v4().to_string();
        self.run_with_signal(input, execution_id, CancellationSignal::new())
            .await
    }

    /// 运行一次执行；signal 由调用方持有以便中途取消
    pub async fn run_with_signal(
        &mut self,
        input: &str,
        execution_id: String,
        signal: CancellationSignal,
    ) -> RunResult {
        tracing::info!(execution_id = %execution_id, "execution started");
        self.begin_execution(input, &execution_id);

        let flow = match self.write_checkpoint("user_input", 0.0) {
            Ok(()) => self.drive(&signal).await,
            Err(e) => Err(e),
        };
        self.finish_execution(execution_id, flow)
    }

    fn begin_execution(&mut self, input: &str, execution_id: &str) {
        if self.state != AgentState::Idle {
            self.set_state(AgentState::Idle);
        }
        self.execution_id = Some(execution_id.to_string());
        self.started_at = Some(Instant::now());
        self.turn = 0;
        self.last_error = None;
        self.recovery = None;
        self.pending_tools.clear();
        self.messages.push(Message::user(input));
        self.events.emit(EngineEvent::UserInput {
            execution_id: execution_id.to_string(),
            text: input.to_string(),
        });
        self.set_state(AgentState::Thinking);
    }

    fn finish_execution(
        &mut self,
        execution_id: String,
        flow: Result<Finished, AgentError>,
    ) -> RunResult {
        let (status, response, error) = match flow {
            Ok(Finished::Completed(answer)) => {
                self.set_state(AgentState::Completed);
                (RunStatus::Completed, Some(answer), None)
            }
            Ok(Finished::Cancelled(reason)) => {
                tracing::info!(execution_id = %execution_id, reason = %reason, "execution cancelled");
                self.pending_tools.clear();
                self.set_state(AgentState::Idle);
                (RunStatus::Cancelled, None, Some(format!("Cancelled: {reason}")))
            }
            Err(e) => {
                let text = e.to_string();
                tracing::error!(execution_id = %execution_id, turn = self.turn, error = %text, "execution failed");
                self.last_error = Some(text.clone());
                self.events.emit(EngineEvent::Error { text: text.clone() });
                self.set_state(AgentState::Error);
                (RunStatus::Failed, None, Some(text))
            }
        };
        RunResult {
            execution_id,
            status,
            response,
            snapshot: self.snapshot(),
            error,
        }
    }

    /// 回合循环：错误在回合边界统一捕获并尝试恢复
    async fn drive(&mut self, signal: &CancellationSignal) -> Result<Finished, AgentError> {
        loop {
            if let Some(reason) = signal.reason() {
                return Ok(Finished::Cancelled(reason.to_string()));
            }
            match self.step(signal).await {
                Ok(TurnFlow::Continue) => continue,
                Ok(TurnFlow::Completed(answer)) => return Ok(Finished::Completed(answer)),
                Ok(TurnFlow::Cancelled(reason)) => return Ok(Finished::Cancelled(reason)),
                Err(e @ AgentError::TurnLimitExceeded { .. }) => return Err(e),
                Err(e) => self.recover(e)?,
            }
        }
    }

    /// 从不晚于当前回合的最后一个检查点恢复；次数超限或无检查点时返回错误
    fn recover(&mut self, error: AgentError) -> Result<(), AgentError> {
        let turn = self.turn;
        let step = turn as f64;
        let attempts = match self.recovery {
            Some((t, n)) if t == turn => n + 1,
            _ => 1,
        };
        self.recovery = Some((turn, attempts));
        let text = error.to_string();
        tracing::warn!(turn, attempts, error = %text, "turn failed, attempting recovery");
        self.events.emit(EngineEvent::Error { text: text.clone() });

        if attempts > self.config.max_recovery_attempts {
            return Err(AgentError::RecoveryFailed {
                step,
                reason: format!("gave up after {} recovery attempts: {text}", attempts - 1),
            });
        }
        let execution_id = self
            .execution_id
            .clone()
            .ok_or_else(|| AgentError::Checkpoint("no active execution".to_string()))?;
        let manager = self.checkpoints.clone();
        let result = manager.retry_from_step(&execution_id, step, self);
        if result.success {
            self.last_error = Some(text);
            Ok(())
        } else {
            Err(AgentError::RecoveryFailed {
                step,
                reason: format!(
                    "{} (original error: {text})",
                    result.error.unwrap_or_else(|| "unknown".to_string())
                ),
            })
        }
    }

    /// 一个回合；恢复出的待执行工具批次直接执行，不再调用模型
    async fn step(&mut self, signal: &CancellationSignal) -> Result<TurnFlow, AgentError> {
        if !self.pending_tools.is_empty() {
            return self.run_tool_batch(signal).await;
        }

        self.turn += 1;
        if self.turn >= self.config.max_turns {
            return Err(AgentError::TurnLimitExceeded {
                turn: self.turn,
                max_turns: self.config.max_turns,
            });
        }
        tracing::info!(turn = self.turn, max_turns = self.config.max_turns, "turn started");
        self.events.emit(EngineEvent::TurnStarted {
            turn: self.turn,
            max_turns: self.config.max_turns,
        });
        self.set_state(AgentState::Thinking);

        let tools = self.executor.definitions();
        let response = tokio::select! {
            biased;
            reason = signal.cancelled() => return Ok(TurnFlow::Cancelled(reason)),
            r = self.planner.plan(&self.messages, &tools) => r?,
        };
        self.tokens
            .add(response.usage.input_tokens, response.usage.output_tokens);

        let segments = parse_response(&response);
        let requests = tool_requests(&segments);
        self.messages
            .push(Message::with_blocks(Role::Assistant, response.content.clone()));

        if requests.is_empty() {
            let answer = first_text(&segments).unwrap_or_default().to_string();
            self.write_checkpoint(&format!("turn_{}", self.turn), self.turn as f64)?;
            return Ok(TurnFlow::Completed(answer));
        }

        for request in &requests {
            self.tool_calls.push(ToolCall::pending(request));
            self.events.emit(EngineEvent::ToolSelected {
                id: request.id.clone(),
                tool: request.name.clone(),
                input: request.input.clone(),
            });
        }
        self.pending_tools = requests;
        self.write_checkpoint(&format!("turn_{}", self.turn), self.turn as f64)?;
        self.run_tool_batch(signal).await
    }

    /// 按模型输出顺序逐个执行；取消时剩余调用以失败结果折回，保持历史完整
    async fn run_tool_batch(&mut self, signal: &CancellationSignal) -> Result<TurnFlow, AgentError> {
        self.set_state(AgentState::UsingTool);
        let requests = self.pending_tools.clone();
        let mut blocks = Vec::with_capacity(requests.len());
        let mut cancelled: Option<String> = None;

        for request in &requests {
            if let Some(reason) = &cancelled {
                let message = format!("Tool execution cancelled: {reason}");
                self.finish_tool_call(request, ToolCallStatus::Failed, None, Some(message.clone()));
                blocks.push(ContentBlock::ToolResult {
                    tool_use_id: request.id.clone(),
                    content: message,
                    is_error: true,
                });
                continue;
            }
            match self.execute_one(request, signal).await {
                ToolStep::Folded(block) => blocks.push(block),
                ToolStep::Cancelled(reason) => {
                    let message = format!("Tool execution cancelled: {reason}");
                    blocks.push(ContentBlock::ToolResult {
                        tool_use_id: request.id.clone(),
                        content: message,
                        is_error: true,
                    });
                    cancelled = Some(reason);
                }
            }
        }

        self.messages.push(Message::with_blocks(Role::User, blocks));
        self.pending_tools.clear();
        if let Some(reason) = cancelled {
            return Ok(TurnFlow::Cancelled(reason));
        }
        self.write_checkpoint(&format!("tools_{}", self.turn), self.turn as f64 + 0.5)?;
        self.set_state(AgentState::Thinking);
        Ok(TurnFlow::Continue)
    }

    /// 权限判定 -> 执行 -> 更新日志与事件；拒绝以失败结果折回
    async fn execute_one(&mut self, request: &ToolRequest, signal: &CancellationSignal) -> ToolStep {
        let started = Instant::now();
        let known = self.executor.get(&request.name).is_some();

        if known {
            let risk = self.executor.risk_level(&request.name);
            let decision = tokio::select! {
                biased;
                reason = signal.cancelled() => {
                    self.finish_tool_call(request, ToolCallStatus::Failed, None, Some(format!("cancelled: {reason}")));
                    return ToolStep::Cancelled(reason);
                }
                d = self.gate.decide(&request.name, risk, &request.input) => d,
            };
            if let PermissionDecision::Denied(reason) = decision {
                tracing::info!(tool = %request.name, reason = %reason, "tool call denied");
                self.events.emit(EngineEvent::ToolDenied {
                    id: request.id.clone(),
                    tool: request.name.clone(),
                    reason: reason.clone(),
                });
                let result = ToolResult::failure(format!("Permission denied: {reason}"));
                return ToolStep::Folded(self.fold_result(request, result));
            }
        }

        self.set_state(AgentState::WaitingForResult);
        let outcome = self
            .executor
            .execute(&request.name, request.input.clone(), Some(signal))
            .await;
        self.set_state(AgentState::UsingTool);

        let label = outcome.as_str();
        match outcome {
            ToolOutcome::Completed(result) | ToolOutcome::TimedOut(result) => {
                self.emit_executed(request, label, started);
                ToolStep::Folded(self.fold_result(request, result))
            }
            ToolOutcome::Cancelled { reason } => {
                self.finish_tool_call(request, ToolCallStatus::Failed, None, Some(format!("cancelled: {reason}")));
                self.emit_executed(request, label, started);
                ToolStep::Cancelled(reason)
            }
        }
    }

    fn emit_executed(&mut self, request: &ToolRequest, outcome: &str, started: Instant) {
        self.events.emit(EngineEvent::ToolExecuted {
            id: request.id.clone(),
            tool: request.name.clone(),
            outcome: outcome.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }

    fn fold_result(&mut self, request: &ToolRequest, result: ToolResult) -> ContentBlock {
        let observation = result.to_observation();
        let status = if result.success {
            ToolCallStatus::Completed
        } else {
            ToolCallStatus::Failed
        };
        if result.success {
            self.finish_tool_call(request, status, Some(result.output.clone()), None);
        } else {
            self.finish_tool_call(request, status, None, result.error.clone());
        }
        self.events.emit(EngineEvent::ToolResult {
            id: request.id.clone(),
            tool: request.name.clone(),
            success: result.success,
            preview: observation.chars().take(RESULT_PREVIEW_CHARS).collect(),
        });
        ContentBlock::ToolResult {
            tool_use_id: request.id.clone(),
            content: observation,
            is_error: !result.success,
        }
    }

    /// 更新同 id 的待定条目；恢复后重跑的调用找不到待定条目时追加新条目
    fn finish_tool_call(
        &mut self,
        request: &ToolRequest,
        status: ToolCallStatus,
        result: Option<String>,
        error: Option<String>,
    ) {
        let index = self
            .tool_calls
            .iter()
            .rposition(|c| c.id == request.id && c.status == ToolCallStatus::Pending);
        let index = match index {
            Some(i) => i,
            None => {
                self.tool_calls.push(ToolCall::pending(request));
                self.tool_calls.len() - 1
            }
        };
        let entry = &mut self.tool_calls[index];
        entry.status = status;
        entry.result = result;
        entry.error = error;
    }
}
