//! 生命周期事件与钩子总线
//!
//! 引擎每个关键节点发出一个 EngineEvent：先同步分发给静态注册的 HookHandler，
//! 再广播给 mpsc 订阅者（CLI 渲染、测试记录）。处理器返回错误或 panic 都只记 warn，
//! 不会影响引擎执行。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::AgentState;

/// 引擎过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// 收到用户输入，开始一次执行
    UserInput { execution_id: String, text: String },
    /// 新一轮开始（调用模型前）
    TurnStarted { turn: u32, max_turns: u32 },
    /// 模型选择了工具
    ToolSelected {
        id: String,
        tool: String,
        input: Value,
    },
    /// 权限闸门拒绝，工具未执行
    ToolDenied {
        id: String,
        tool: String,
        reason: String,
    },
    /// 工具执行结束（outcome: ok / error / timeout / cancelled）
    ToolExecuted {
        id: String,
        tool: String,
        outcome: String,
        duration_ms: u64,
    },
    /// 折回上下文的工具结果（预览）
    ToolResult {
        id: String,
        tool: String,
        success: bool,
        preview: String,
    },
    StateChanged { from: AgentState, to: AgentState },
    CheckpointWritten { step_name: String, step_index: f64 },
    Error { text: String },
    Shutdown,
}

impl EngineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::UserInput { .. } => "user_input",
            EngineEvent::TurnStarted { .. } => "turn_started",
            EngineEvent::ToolSelected { .. } => "tool_selected",
            EngineEvent::ToolDenied { .. } => "tool_denied",
            EngineEvent::ToolExecuted { .. } => "tool_executed",
            EngineEvent::ToolResult { .. } => "tool_result",
            EngineEvent::StateChanged { .. } => "state_changed",
            EngineEvent::CheckpointWritten { .. } => "checkpoint_written",
            EngineEvent::Error { .. } => "error",
            EngineEvent::Shutdown => "shutdown",
        }
    }
}

/// 钩子处理器：编译期注册，同步调用
pub trait HookHandler: Send + Sync {
    fn name(&self) -> &str;

    fn on_event(&self, event: &EngineEvent) -> anyhow::Result<()>;
}

/// 每个引擎一个事件总线
#[derive(Default, Clone)]
pub struct EventBus {
    handlers: Vec<Arc<dyn HookHandler>>,
    subscribers: Vec<mpsc::UnboundedSender<EngineEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: impl HookHandler + 'static) {
        self.handlers.push(Arc::new(handler));
    }

    /// 订阅所有事件；接收端丢弃后自动退订
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<EngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn emit(&mut self, event: EngineEvent) {
        for handler in &self.handlers {
            match catch_unwind(AssertUnwindSafe(|| handler.on_event(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(hook = handler.name(), event = event.kind(), error = %e, "hook handler failed");
                }
                Err(_) => {
                    tracing::warn!(hook = handler.name(), event = event.kind(), "hook handler panicked");
                }
            }
        }
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// 把每个事件写入 tracing（debug 级别）
pub struct LoggingHook;

impl HookHandler for LoggingHook {
    fn name(&self) -> &str {
        "logging"
    }

    fn on_event(&self, event: &EngineEvent) -> anyhow::Result<()> {
        let json = serde_json::to_string(event)?;
        tracing::debug!(event = %json, "engine event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl HookHandler for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        fn on_event(&self, event: &EngineEvent) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(event.kind().to_string());
            Ok(())
        }
    }

    struct Failing;

    impl HookHandler for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn on_event(&self, _event: &EngineEvent) -> anyhow::Result<()> {
            anyhow::bail!("audit rejected")
        }
    }

    struct Panicking;

    impl HookHandler for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        fn on_event(&self, _event: &EngineEvent) -> anyhow::Result<()> {
            panic!("hook bug")
        }
    }

    #[test]
    fn test_failing_handlers_are_isolated() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.register(Panicking);
        bus.register(Failing);
        bus.register(Recorder(seen.clone()));
        bus.emit(EngineEvent::TurnStarted { turn: 1, max_turns: 5 });
        bus.emit(EngineEvent::Shutdown);
        assert_eq!(*seen.lock().unwrap(), vec!["turn_started", "shutdown"]);
    }

    #[test]
    fn test_subscribers_receive_and_drop() {
        let mut bus = EventBus::new();
        let mut rx = bus.subscribe();
        let dropped = bus.subscribe();
        drop(dropped);
        bus.emit(EngineEvent::Error { text: "x".into() });
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::Error { text: "x".into() });
        assert_eq!(bus.subscribers.len(), 1);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let v = serde_json::to_value(EngineEvent::StateChanged {
            from: AgentState::Idle,
            to: AgentState::Thinking,
        })
        .unwrap();
        assert_eq!(v["type"], "state_changed");
        assert_eq!(v["to"], "thinking");
    }
}
