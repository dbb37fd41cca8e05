//! 工具执行器（执行协调）
//!
//! 持有 ToolRegistry、进程超时与重试次数。execute 把每次调用与取消信号赛跑：
//! - 进程内工具：在独立任务中带重试执行；取消时中止任务，最多再等 1s 让其收尾，然后返回 Cancelled
//! - 进程型工具：启动外部进程，取消或超时时先强杀再返回
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::{CancellationSignal, RiskLevel};
use crate::llm::ToolDefinition;
use crate::tools::retry::{execute_with_smart_retry, DEFAULT_MAX_RETRIES};
use crate::tools::{ProcessTool, Tool, ToolKind, ToolOutcome, ToolRegistry, ToolResult};

/// 取消后给进程内任务的收尾时间
const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// 工具执行器：分派两种工具形态，统一超时 / 重试 / 取消
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
    max_retries: u32,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// 使用默认超时执行
    pub async fn execute(
        &self,
        tool_name: &str,
        args: Value,
        signal: Option<&CancellationSignal>,
    ) -> ToolOutcome {
        self.execute_with_timeout(tool_name, args, self.timeout, signal)
            .await
    }

    /// 执行指定工具；未知工具返回失败结果，不会 panic；输出 JSON 审计日志
    pub async fn execute_with_timeout(
        &self,
        tool_name: &str,
        args: Value,
        limit: Duration,
        signal: Option<&CancellationSignal>,
    ) -> ToolOutcome {
        let start = Instant::now();
        let preview = args_preview(&args);
        // 未传入信号时用一个永不触发的本地信号，统一 select 分支
        let local = CancellationSignal::new();
        let signal = signal.unwrap_or(&local);

        let outcome = if signal.is_cancelled() {
            ToolOutcome::Cancelled {
                reason: signal.reason().unwrap_or("cancelled").to_string(),
            }
        } else {
            match self.registry.get(tool_name) {
                None => ToolOutcome::Completed(ToolResult::failure(format!(
                    "Unknown tool: {}",
                    tool_name
                ))),
                Some(ToolKind::InProcess(tool)) => {
                    self.run_in_process(tool, args, signal).await
                }
                Some(ToolKind::Process(tool)) => {
                    run_process(tool.as_ref(), &args, limit, signal).await
                }
            }
        };

        let ok = matches!(&outcome, ToolOutcome::Completed(r) if r.success);
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome.as_str(),
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        outcome
    }

    async fn run_in_process(
        &self,
        tool: Arc<dyn Tool>,
        args: Value,
        signal: &CancellationSignal,
    ) -> ToolOutcome {
        let mut task = tokio::spawn(execute_with_smart_retry(tool, args, self.max_retries));
        tokio::select! {
            biased;
            reason = signal.cancelled() => {
                task.abort();
                let _ = timeout(CANCEL_GRACE, &mut task).await;
                ToolOutcome::Cancelled { reason }
            }
            joined = &mut task => match joined {
                Ok(result) => ToolOutcome::Completed(result),
                Err(e) if e.is_panic() => {
                    ToolOutcome::Completed(ToolResult::failure(format!("Tool panicked: {e}")))
                }
                Err(e) => ToolOutcome::Completed(ToolResult::failure(format!("Tool task failed: {e}"))),
            },
        }
    }

    pub fn get(&self, name: &str) -> Option<ToolKind> {
        self.registry.get(name)
    }

    pub fn risk_level(&self, name: &str) -> RiskLevel {
        self.registry
            .get(name)
            .map(|t| t.risk_level())
            .unwrap_or_default()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }
}

/// 进程型工具：启动 -> 等待结束 / 超时 / 取消，后两者都先强杀
async fn run_process(
    tool: &dyn ProcessTool,
    args: &Value,
    limit: Duration,
    signal: &CancellationSignal,
) -> ToolOutcome {
    let mut handle = match tool.start(args) {
        Ok(h) => h,
        Err(e) => return ToolOutcome::Completed(ToolResult::failure(e)),
    };

    enum Ended {
        Exited(Result<(), String>),
        Cancelled(String),
        TimedOut,
    }

    let ended = tokio::select! {
        biased;
        reason = signal.cancelled() => Ended::Cancelled(reason),
        _ = tokio::time::sleep(limit) => Ended::TimedOut,
        r = handle.wait() => Ended::Exited(r),
    };

    match ended {
        Ended::Exited(Ok(())) => ToolOutcome::Completed(handle.result().await),
        Ended::Exited(Err(e)) => ToolOutcome::Completed(ToolResult::failure(e)),
        Ended::Cancelled(reason) => {
            if let Err(e) = handle.kill().await {
                tracing::warn!(tool = tool.name(), error = %e, "kill after cancel failed");
            }
            ToolOutcome::Cancelled { reason }
        }
        Ended::TimedOut => {
            if let Err(e) = handle.kill().await {
                tracing::warn!(tool = tool.name(), error = %e, "kill after timeout failed");
            }
            ToolOutcome::TimedOut(
                ToolResult::failure(format!(
                    "Tool '{}' timed out after {}s",
                    tool.name(),
                    limit.as_secs_f64()
                ))
                .with_meta("timeout_secs", limit.as_secs_f64()),
            )
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
