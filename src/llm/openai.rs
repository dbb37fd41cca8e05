//! OpenAI 兼容 API 客户端
//!
//! 通过 reqwest 调用任意 OpenAI 兼容的 /chat/completions 端点（可配置 base_url），支持 function tools；
//! DeepSeek、OpenAI、自建代理均可。ToolUse 块映射为 assistant.tool_calls，ToolResult 块映射为 role=tool 消息。

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{LlmError, ModelClient, ModelResponse, ToolDefinition, Usage};
use crate::memory::{ContentBlock, Message, Role};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// OpenAI 兼容客户端：持有 HTTP client、端点与 model 名
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>, timeout_secs: u64) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.unwrap_or(OPENAI_BASE_URL).trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        }
    }

    /// DeepSeek 预设：优先使用 DEEPSEEK_API_KEY
    pub fn deepseek(model: Option<&str>, timeout_secs: u64) -> Self {
        let api_key = std::env::var("DEEPSEEK_API_KEY")
            .ok()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        Self::new(
            Some(DEEPSEEK_BASE_URL),
            model.unwrap_or(DEEPSEEK_CHAT),
            api_key.as_deref(),
            timeout_secs,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        max_tokens: u32,
    ) -> Value {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            wire.push(json!({"role": "system", "content": system}));
        }
        for m in messages {
            wire.extend(to_wire_messages(m));
        }
        let mut body = json!({
            "model": self.model,
            "messages": wire,
            "max_tokens": max_tokens,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.input_schema,
                            }
                        })
                    })
                    .collect(),
            );
        }
        body
    }
}

/// 一条内部消息可能展开为多条线上消息（多个工具结果各占一条 role=tool）
fn to_wire_messages(message: &Message) -> Vec<Value> {
    match message.role {
        Role::System => vec![json!({"role": "system", "content": message.text()})],
        Role::User => {
            let mut out = Vec::new();
            for block in &message.content {
                if let ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } = block
                {
                    out.push(json!({"role": "tool", "tool_call_id": tool_use_id, "content": content}));
                }
            }
            let text = message.text();
            if !text.is_empty() {
                out.push(json!({"role": "user", "content": text}));
            }
            out
        }
        Role::Assistant => {
            let tool_calls: Vec<Value> = message
                .content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, name, input } => Some(json!({
                        "id": id,
                        "type": "function",
                        "function": {"name": name, "arguments": input.to_string()},
                    })),
                    _ => None,
                })
                .collect();
            let text = message.text();
            let content = if text.is_empty() {
                Value::Null
            } else {
                Value::String(text)
            };
            let mut msg = json!({"role": "assistant", "content": content});
            if !tool_calls.is_empty() {
                msg["tool_calls"] = Value::Array(tool_calls);
            }
            vec![msg]
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    model: String,
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn parse_completion(completion: ChatCompletion) -> Result<ModelResponse, LlmError> {
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("no choices in completion".to_string()))?;

    let mut content = Vec::new();
    if let Some(text) = choice.message.content.filter(|t| !t.trim().is_empty()) {
        content.push(ContentBlock::Text { text });
    }
    for call in choice.message.tool_calls {
        let input = if call.function.arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&call.function.arguments).map_err(|e| {
                LlmError::InvalidResponse(format!(
                    "tool call '{}' has malformed arguments: {e}",
                    call.function.name
                ))
            })?
        };
        content.push(ContentBlock::ToolUse {
            id: call.id,
            name: call.function.name,
            input,
        });
    }

    let usage = completion
        .usage
        .map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(ModelResponse {
        content,
        usage,
        stop_reason: choice.finish_reason,
        model: completion.model,
    })
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn create_message(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        max_tokens: u32,
    ) -> Result<ModelResponse, LlmError> {
        let body = self.build_request(system, messages, tools, max_tokens);
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(LlmError::RateLimited { retry_after_ms });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        parse_completion(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_maps_tool_blocks() {
        let client = OpenAiClient::new(Some("http://localhost:1/v1/"), "m", Some("k"), 5);
        let history = vec![
            Message::user("list files"),
            Message::with_blocks(
                Role::Assistant,
                vec![ContentBlock::ToolUse {
                    id: "c1".into(),
                    name: "glob".into(),
                    input: json!({"pattern": "*"}),
                }],
            ),
            Message::with_blocks(
                Role::User,
                vec![ContentBlock::ToolResult {
                    tool_use_id: "c1".into(),
                    content: "a.rs".into(),
                    is_error: false,
                }],
            ),
        ];
        let tools = vec![ToolDefinition {
            name: "glob".into(),
            description: "find files".into(),
            input_schema: json!({"type": "object"}),
        }];
        let body = client.build_request("sys", &history, &tools, 256);
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[1]["role"], "user");
        assert_eq!(msgs[2]["tool_calls"][0]["function"]["name"], "glob");
        assert!(msgs[2]["content"].is_null());
        assert_eq!(msgs[3]["role"], "tool");
        assert_eq!(msgs[3]["tool_call_id"], "c1");
        assert_eq!(body["tools"][0]["function"]["name"], "glob");
        assert_eq!(client.base_url, "http://localhost:1/v1");
    }

    #[test]
    fn test_parse_completion_preserves_text_then_tools() {
        let raw = json!({
            "model": "deepseek-chat",
            "choices": [{
                "message": {
                    "content": "Let me look.",
                    "tool_calls": [
                        {"id": "a", "type": "function", "function": {"name": "glob", "arguments": "{\"pattern\":\"*\"}"}},
                        {"id": "b", "type": "function", "function": {"name": "read_file", "arguments": ""}}
                    ]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 4}
        });
        let completion: ChatCompletion = serde_json::from_value(raw).unwrap();
        let resp = parse_completion(completion).unwrap();
        assert_eq!(resp.content.len(), 3);
        assert_eq!(resp.content[0].as_text(), Some("Let me look."));
        assert!(matches!(&resp.content[2], ContentBlock::ToolUse { name, input, .. } if name == "read_file" && input == &json!({})));
        assert_eq!(resp.usage.input_tokens, 12);
        assert_eq!(resp.stop_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn test_parse_completion_rejects_bad_arguments() {
        let raw = json!({
            "choices": [{
                "message": {"content": null, "tool_calls": [
                    {"id": "a", "type": "function", "function": {"name": "glob", "arguments": "{not json"}}
                ]},
                "finish_reason": "tool_calls"
            }]
        });
        let completion: ChatCompletion = serde_json::from_value(raw).unwrap();
        assert!(matches!(parse_completion(completion), Err(LlmError::InvalidResponse(_))));
    }
}
