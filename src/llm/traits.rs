//! 模型客户端抽象
//!
//! 引擎只依赖 ModelClient::create_message：输入 system、完整消息历史、工具目录与 max_tokens，
//! 返回有序内容块（文本 / 工具调用）与 token 用量。具体后端（OpenAI 兼容 / DeepSeek / Mock）可替换。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::memory::{ContentBlock, Message};

/// 模型调用错误；在回合边界被捕获并触发检查点恢复
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// 测试脚本注入的失败
    #[error("Scripted failure: {0}")]
    Scripted(String),
}

/// 提供给模型的工具定义
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// 单次调用的 token 用量
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// 模型回复：内容块顺序即模型输出顺序
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
    pub stop_reason: Option<String>,
    pub model: String,
}

impl ModelResponse {
    /// 只含一段文本的回复
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            usage: Usage::default(),
            stop_reason: Some("end_turn".to_string()),
            model: String::new(),
        }
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Usage {
            input_tokens,
            output_tokens,
        };
        self
    }
}

/// 模型客户端 trait
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn create_message(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        max_tokens: u32,
    ) -> Result<ModelResponse, LlmError>;
}
