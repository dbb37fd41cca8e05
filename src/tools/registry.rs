//! 工具注册表
//!
//! 工具按能力分两种形态：进程内工具实现 Tool（异步 execute），进程型工具实现 ProcessTool
//! （start 返回可轮询、可强杀的 ProcessHandle）。ToolKind 把两者收拢为一个标签联合，
//! ToolExecutor 按变体分派执行策略。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::RiskLevel;
use crate::llm::ToolDefinition;
use crate::tools::ToolResult;

fn empty_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

/// 进程内工具：名称、描述（供 LLM 理解）、参数 schema、风险等级、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（模型 tool call 中的 name）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        empty_schema()
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Normal
    }

    /// 执行工具；Err 中的文本参与重试分类
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 运行中的外部进程
#[async_trait]
pub trait ProcessHandle: Send {
    fn is_running(&mut self) -> bool;

    /// 等待进程自然结束
    async fn wait(&mut self) -> Result<(), String>;

    /// 强制终止（信号级，非协作）
    async fn kill(&mut self) -> Result<(), String>;

    /// 进程结束后的结果（退出码 / stdout / stderr）
    async fn result(&mut self) -> ToolResult;
}

/// 进程型工具：start 启动外部进程并交出句柄
pub trait ProcessTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> Value {
        empty_schema()
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Dangerous
    }

    fn start(&self, args: &Value) -> Result<Box<dyn ProcessHandle>, String>;
}

/// 按能力区分的工具形态
#[derive(Clone)]
pub enum ToolKind {
    InProcess(Arc<dyn Tool>),
    Process(Arc<dyn ProcessTool>),
}

impl ToolKind {
    pub fn name(&self) -> &str {
        match self {
            ToolKind::InProcess(t) => t.name(),
            ToolKind::Process(t) => t.name(),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            ToolKind::InProcess(t) => t.description(),
            ToolKind::Process(t) => t.description(),
        }
    }

    pub fn input_schema(&self) -> Value {
        match self {
            ToolKind::InProcess(t) => t.parameters_schema(),
            ToolKind::Process(t) => t.parameters_schema(),
        }
    }

    pub fn risk_level(&self) -> RiskLevel {
        match self {
            ToolKind::InProcess(t) => t.risk_level(),
            ToolKind::Process(t) => t.risk_level(),
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// 工具注册表：按名称存储 ToolKind；目录按名称排序，保证每轮提供给模型的工具顺序稳定
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolKind>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, ToolKind::InProcess(Arc::new(tool)));
    }

    pub fn register_process(&mut self, tool: impl ProcessTool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, ToolKind::Process(Arc::new(tool)));
    }

    pub fn get(&self, name: &str) -> Option<ToolKind> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 工具定义目录（每轮随请求发给模型）
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(ToolKind::definition).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;

    #[test]
    fn test_register_and_catalogue() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        assert!(reg.contains("echo"));
        assert_eq!(reg.len(), 1);
        let defs = reg.definitions();
        assert_eq!(defs[0].name, "echo");
        assert_eq!(defs[0].input_schema["type"], "object");
        assert_eq!(reg.get("echo").unwrap().risk_level(), RiskLevel::Safe);
        assert!(reg.get("missing").is_none());
    }
}
