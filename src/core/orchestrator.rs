//! 编排器：主控循环
//!
//! 后台任务独占 AgentEngine 与 SessionSupervisor，消费命令（Submit / Cancel / Reset / Quit）。
//! 执行进行中仍持续读取命令：Cancel 立即触发当前执行的取消信号，Submit 排队，Reset 取消后重置，
//! Quit 取消当前执行并退出。每次执行的 RunResult 发往结果通道，退出时发出 Shutdown 事件。

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::SessionSupervisor;
use crate::hooks::EngineEvent;
use crate::react::{AgentEngine, RunResult};

/// 发往编排器的命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// 提交用户输入，开始一次执行
    Submit(String),
    /// 取消执行；execution_id 为 None 时取消当前执行
    Cancel {
        execution_id: Option<String>,
        reason: String,
    },
    /// 清空对话、计数与工具日志
    Reset,
    /// 退出
    Quit,
}

impl Command {
    pub fn cancel_current(reason: impl Into<String>) -> Self {
        Command::Cancel {
            execution_id: None,
            reason: reason.into(),
        }
    }
}

/// 编排器句柄：命令发送端、结果接收端、后台任务
pub struct OrchestratorHandle {
    pub commands: mpsc::UnboundedSender<Command>,
    pub results: mpsc::UnboundedReceiver<RunResult>,
    pub task: JoinHandle<()>,
}

/// 在后台任务中运行编排循环
pub fn spawn_orchestrator(engine: AgentEngine) -> OrchestratorHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (result_tx, result_rx) = mpsc::unbounded_channel::<RunResult>();
    let task = tokio::spawn(run_orchestrator(engine, cmd_rx, result_tx));
    OrchestratorHandle {
        commands: cmd_tx,
        results: result_rx,
        task,
    }
}

/// 编排循环；命令通道关闭后处理完排队输入再退出
pub async fn run_orchestrator(
    mut engine: AgentEngine,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    result_tx: mpsc::UnboundedSender<RunResult>,
) {
    let mut supervisor = SessionSupervisor::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    let mut closed = false;

    loop {
        let input = match queue.pop_front() {
            Some(input) => input,
            None if closed => break,
            None => match cmd_rx.recv().await {
                Some(Command::Submit(input)) => input,
                Some(Command::Cancel { .. }) => {
                    tracing::debug!("cancel ignored: no execution in flight");
                    continue;
                }
                Some(Command::Reset) => {
                    engine.reset();
                    continue;
                }
                Some(Command::Quit) | None => break,
            },
        };

        let handle = supervisor.begin_execution();
        let mut reset_after = false;
        let mut quit = false;
        let result = {
            let run = engine.run_with_signal(&input, handle.execution_id.clone(), handle.signal.clone());
            tokio::pin!(run);
            loop {
                tokio::select! {
                    biased;
                    cmd = cmd_rx.recv(), if !closed => match cmd {
                        Some(Command::Cancel { execution_id, reason }) => {
                            let hit = match execution_id {
                                Some(id) => supervisor.cancel(&id, &reason),
                                None => supervisor.cancel_current(&reason),
                            };
                            tracing::info!(reason = %reason, hit, "cancel requested");
                        }
                        Some(Command::Submit(next)) => queue.push_back(next),
                        Some(Command::Reset) => {
                            reset_after = true;
                            supervisor.cancel_current("reset requested");
                        }
                        Some(Command::Quit) => {
                            quit = true;
                            supervisor.cancel_current("shutdown requested");
                        }
                        None => closed = true,
                    },
                    result = &mut run => break result,
                }
            }
        };

        supervisor.finish_execution(&result.execution_id);
        if result_tx.send(result).is_err() {
            tracing::debug!("result receiver dropped");
        }
        if reset_after {
            engine.reset();
        }
        if quit {
            queue.clear();
            break;
        }
    }

    tracing::info!("orchestrator shutting down");
    engine.events_mut().emit(EngineEvent::Shutdown);
}
