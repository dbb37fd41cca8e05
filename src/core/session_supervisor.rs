//! 会话监管：执行生命周期与中断管理
//!
//! 每次执行分配新的 execution_id 与全新的 CancellationSignal；取消只作用于 id 匹配的执行，
//! 迟到的「取消执行 N」不会波及执行 N+1。

use uuid::Uuid;

use crate::core::CancellationSignal;

/// 当前执行的句柄
#[derive(Clone, Debug)]
pub struct ExecutionHandle {
    pub execution_id: String,
    pub signal: CancellationSignal,
}

/// 会话级生命周期管理
#[derive(Debug, Default)]
pub struct SessionSupervisor {
    current: Option<ExecutionHandle>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始新执行：旧执行的信号被丢弃（不会被取消，也不会被复用）
    pub fn begin_execution(&mut self) -> ExecutionHandle {
        let handle = ExecutionHandle {
            execution_id: Uuid::new_v4().to_string(),
            signal: CancellationSignal::new(),
        };
        self.current = Some(handle.clone());
        handle
    }

    /// 执行结束后清空当前句柄
    pub fn finish_execution(&mut self, execution_id: &str) {
        if self
            .current
            .as_ref()
            .is_some_and(|h| h.execution_id == execution_id)
        {
            self.current = None;
        }
    }

    pub fn current(&self) -> Option<&ExecutionHandle> {
        self.current.as_ref()
    }

    /// 取消指定执行；id 不匹配当前执行时忽略，返回是否真正触发
    pub fn cancel(&self, execution_id: &str, reason: &str) -> bool {
        match &self.current {
            Some(h) if h.execution_id == execution_id => h.signal.cancel(reason),
            _ => {
                tracing::debug!(execution_id, "cancel ignored: execution is not current");
                false
            }
        }
    }

    /// 取消当前执行（用户 Ctrl+C）
    pub fn cancel_current(&self, reason: &str) -> bool {
        self.current
            .as_ref()
            .map(|h| h.signal.cancel(reason))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_execution_gets_fresh_token() {
        let mut sup = SessionSupervisor::new();
        let first = sup.begin_execution();
        assert!(sup.cancel_current("stop"));
        assert!(first.signal.is_cancelled());

        let second = sup.begin_execution();
        assert_ne!(first.execution_id, second.execution_id);
        assert!(!second.signal.is_cancelled());
    }

    #[test]
    fn test_stale_cancel_does_not_hit_next_execution() {
        let mut sup = SessionSupervisor::new();
        let first = sup.begin_execution();
        sup.finish_execution(&first.execution_id);
        let second = sup.begin_execution();

        assert!(!sup.cancel(&first.execution_id, "late"));
        assert!(!second.signal.is_cancelled());
        assert!(!first.signal.is_cancelled());
    }

    #[test]
    fn test_cancel_without_execution_is_noop() {
        let sup = SessionSupervisor::new();
        assert!(!sup.cancel_current("nothing running"));
    }

    #[test]
    fn test_finish_clears_only_matching_execution() {
        let mut sup = SessionSupervisor::new();
        let h = sup.begin_execution();
        sup.finish_execution("other-id");
        assert!(sup.current().is_some());
        sup.finish_execution(&h.execution_id);
        assert!(sup.current().is_none());
    }
}
