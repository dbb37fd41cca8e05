//! 脚本化模型客户端（用于测试与离线运行，无需 API）
//!
//! 按顺序弹出预置的回复或错误；脚本耗尽后回显最后一条用户文本，便于本地跑通回合流程。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{LlmError, ModelClient, ModelResponse, ToolDefinition};
use crate::memory::{ContentBlock, Message, Role};

/// 预置回复队列
#[derive(Debug, Default)]
pub struct ScriptedModelClient {
    script: Mutex<VecDeque<Result<ModelResponse, LlmError>>>,
    calls: AtomicUsize,
    /// 每次调用时看到的消息条数
    seen_history: Mutex<Vec<usize>>,
}

impl ScriptedModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(self, response: ModelResponse) -> Self {
        self.push(Ok(response))
    }

    pub fn push_text(self, text: &str) -> Self {
        self.push_response(ModelResponse::text(text))
    }

    /// 一条包含若干工具调用的回复；可在前面带一段文本
    pub fn push_tool_calls(self, text: Option<&str>, calls: &[(&str, Value)]) -> Self {
        let mut content = Vec::new();
        if let Some(t) = text {
            content.push(ContentBlock::text(t));
        }
        let offset = self.calls_scripted();
        for (i, (name, input)) in calls.iter().enumerate() {
            content.push(ContentBlock::ToolUse {
                id: format!("call_{}_{}", offset, i),
                name: name.to_string(),
                input: input.clone(),
            });
        }
        self.push_response(ModelResponse {
            content,
            usage: Default::default(),
            stop_reason: Some("tool_use".to_string()),
            model: "scripted".to_string(),
        })
    }

    pub fn push_error(self, err: LlmError) -> Self {
        self.push(Err(err))
    }

    fn push(self, item: Result<ModelResponse, LlmError>) -> Self {
        if let Ok(mut q) = self.script.lock() {
            q.push_back(item);
        }
        self
    }

    fn calls_scripted(&self) -> usize {
        self.script.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_history(&self) -> Vec<usize> {
        self.seen_history.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn create_message(
        &self,
        _system: &str,
        messages: &[Message],
        _tools: &[ToolDefinition],
        _max_tokens: u32,
    ) -> Result<ModelResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen_history.lock() {
            seen.push(messages.len());
        }
        let next = self
            .script
            .lock()
            .map_err(|_| LlmError::Scripted("script lock poisoned".into()))?
            .pop_front();
        match next {
            Some(item) => item,
            None => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.text())
                    .unwrap_or_else(|| "(no input)".to_string());
                Ok(ModelResponse::text(format!("Echo from Mock: {last_user}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_script_is_consumed_in_order() {
        let client = ScriptedModelClient::new()
            .push_tool_calls(None, &[("glob", json!({"pattern": "*.rs"}))])
            .push_error(LlmError::Scripted("boom".into()))
            .push_text("done");

        let first = client.create_message("", &[], &[], 100).await.unwrap();
        assert!(matches!(first.content[0], ContentBlock::ToolUse { .. }));
        assert!(client.create_message("", &[], &[], 100).await.is_err());
        let third = client.create_message("", &[], &[], 100).await.unwrap();
        assert_eq!(third.content[0].as_text(), Some("done"));
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_script_echoes_user() {
        let client = ScriptedModelClient::new();
        let resp = client
            .create_message("", &[Message::user("hello")], &[], 100)
            .await
            .unwrap();
        assert_eq!(resp.content[0].as_text(), Some("Echo from Mock: hello"));
    }

    #[tokio::test]
    async fn test_tool_call_ids_are_unique_across_responses() {
        let client = ScriptedModelClient::new()
            .push_tool_calls(None, &[("a", json!({})), ("b", json!({}))])
            .push_tool_calls(None, &[("c", json!({}))]);
        let mut ids = Vec::new();
        for _ in 0..2 {
            let r = client.create_message("", &[], &[], 1).await.unwrap();
            for b in r.content {
                if let ContentBlock::ToolUse { id, .. } = b {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }
}
