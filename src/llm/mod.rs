//! LLM 层：模型客户端抽象与实现（OpenAI 兼容 / DeepSeek / 脚本化 Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::ScriptedModelClient;
pub use openai::{OpenAiClient, DEEPSEEK_CHAT};
pub use traits::{LlmError, ModelClient, ModelResponse, ToolDefinition, Usage};
