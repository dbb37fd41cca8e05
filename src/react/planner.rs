//! Planner：调用模型并把回复拆成有序片段
//!
//! 模型回复中文本与工具调用可以交错出现；parse_response 按原顺序拆成 Segment 列表，
//! 运行循环据此决定本回合是结束（无工具调用）还是进入工具执行。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;
use crate::llm::{ModelClient, ModelResponse, ToolDefinition};
use crate::memory::{ContentBlock, Message};

/// 模型请求的一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// 回复片段（保持模型输出顺序）
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    ToolCall(ToolRequest),
}

/// 拆分模型回复；空白文本块丢弃
pub fn parse_response(response: &ModelResponse) -> Vec<Segment> {
    response
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } if !text.trim().is_empty() => {
                Some(Segment::Text(text.clone()))
            }
            ContentBlock::ToolUse { id, name, input } => Some(Segment::ToolCall(ToolRequest {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            })),
            _ => None,
        })
        .collect()
}

/// 只取工具调用，顺序不变
pub fn tool_requests(segments: &[Segment]) -> Vec<ToolRequest> {
    segments
        .iter()
        .filter_map(|s| match s {
            Segment::ToolCall(req) => Some(req.clone()),
            Segment::Text(_) => None,
        })
        .collect()
}

/// 第一段文本（无工具调用时作为最终回答）
pub fn first_text(segments: &[Segment]) -> Option<&str> {
    segments.iter().find_map(|s| match s {
        Segment::Text(t) => Some(t.as_str()),
        Segment::ToolCall(_) => None,
    })
}

/// Planner：持有模型客户端、system prompt 与单次生成上限
pub struct Planner {
    model: Arc<dyn ModelClient>,
    system_prompt: String,
    max_tokens: u32,
}

impl Planner {
    pub fn new(model: Arc<dyn ModelClient>, system_prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model,
            system_prompt: system_prompt.into(),
            max_tokens,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 带完整历史与工具目录调用模型
    pub async fn plan(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ModelResponse, AgentError> {
        let response = self
            .model
            .create_message(&self.system_prompt, messages, tools, self.max_tokens)
            .await?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn interleaved() -> ModelResponse {
        ModelResponse {
            content: vec![
                ContentBlock::text("Let me look."),
                ContentBlock::ToolUse {
                    id: "a".into(),
                    name: "glob".into(),
                    input: json!({"pattern": "*.rs"}),
                },
                ContentBlock::text("  "),
                ContentBlock::text("Then read."),
                ContentBlock::ToolUse {
                    id: "b".into(),
                    name: "read_file".into(),
                    input: json!({"path": "lib.rs"}),
                },
            ],
            usage: Default::default(),
            stop_reason: Some("tool_use".into()),
            model: "test".into(),
        }
    }

    #[test]
    fn test_parse_preserves_order() {
        let segments = parse_response(&interleaved());
        assert_eq!(segments.len(), 4);
        assert!(matches!(&segments[0], Segment::Text(t) if t == "Let me look."));
        assert!(matches!(&segments[1], Segment::ToolCall(r) if r.id == "a"));
        assert!(matches!(&segments[2], Segment::Text(t) if t == "Then read."));
        assert!(matches!(&segments[3], Segment::ToolCall(r) if r.name == "read_file"));
    }

    #[test]
    fn test_tool_requests_and_first_text() {
        let segments = parse_response(&interleaved());
        let ids: Vec<_> = tool_requests(&segments).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(first_text(&segments), Some("Let me look."));
    }

    #[test]
    fn test_text_only_reply() {
        let segments = parse_response(&ModelResponse::text("done"));
        assert!(tool_requests(&segments).is_empty());
        assert_eq!(first_text(&segments), Some("done"));
    }
}
