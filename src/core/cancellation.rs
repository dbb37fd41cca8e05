//! 取消信号
//!
//! 一次执行一个 CancellationSignal，克隆即共享；只能触发一次，首个 reason 生效。
//! 底层复用 tokio_util 的 CancellationToken 做一次性广播唤醒，任意多个等待者都会被唤醒。

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

/// 协作式停止标志：cancelled + reason + 广播唤醒
#[derive(Clone, Debug, Default)]
pub struct CancellationSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 触发取消；返回 true 表示本次调用是第一次触发
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let first = self.reason.set(reason.into()).is_ok();
        if first {
            self.token.cancel();
        }
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }

    /// 等待取消；已取消时立即返回 reason
    pub async fn cancelled(&self) -> String {
        self.token.cancelled().await;
        self.reason().unwrap_or("cancelled").to_string()
    }
}
