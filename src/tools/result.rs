//! 工具执行结果
//!
//! ToolResult 是折回对话上下文的内容；ToolOutcome 把「完成 / 超时 / 取消」区分为类型，
//! 调用方据此判断是失败还是取消，取消永远不会被当作可重试错误。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 工具执行结果（成功与失败共用）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            metadata: Map::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            metadata: Map::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// 写回对话的文本：成功取输出，失败取 "Error: ..."
    pub fn to_observation(&self) -> String {
        if self.success {
            self.output.clone()
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("unknown error"))
        }
    }
}

/// 协调器返回给调用方的结局
#[derive(Clone, Debug, PartialEq)]
pub enum ToolOutcome {
    /// 工具运行结束（success 字段区分成功 / 失败）
    Completed(ToolResult),
    /// 进程型工具超时，已被杀掉
    TimedOut(ToolResult),
    /// 执行被取消
    Cancelled { reason: String },
}

impl ToolOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ToolOutcome::Cancelled { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolOutcome::Completed(r) if r.success => "ok",
            ToolOutcome::Completed(_) => "error",
            ToolOutcome::TimedOut(_) => "timeout",
            ToolOutcome::Cancelled { .. } => "cancelled",
        }
    }

    /// 取出结果；取消时返回 None
    pub fn into_result(self) -> Option<ToolResult> {
        match self {
            ToolOutcome::Completed(r) | ToolOutcome::TimedOut(r) => Some(r),
            ToolOutcome::Cancelled { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_text() {
        assert_eq!(ToolResult::success("a.rs").to_observation(), "a.rs");
        assert_eq!(
            ToolResult::failure("File not found").to_observation(),
            "Error: File not found"
        );
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(ToolOutcome::Completed(ToolResult::success("")).as_str(), "ok");
        assert_eq!(ToolOutcome::Completed(ToolResult::failure("x")).as_str(), "error");
        assert_eq!(ToolOutcome::TimedOut(ToolResult::failure("x")).as_str(), "timeout");
        let cancelled = ToolOutcome::Cancelled { reason: "stop".into() };
        assert!(cancelled.is_cancelled());
        assert!(cancelled.into_result().is_none());
    }
}
