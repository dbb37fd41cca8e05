//! 引擎构建器：统一的引擎初始化逻辑
//!
//! 从 AppConfig 组装模型客户端、工具注册表、权限闸门、检查点存储与事件总线；
//! 每个组件都可以单独替换（测试注入脚本化模型、内存存储、自定义询问回调）。

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{CheckpointManager, DenyPrompter, PermissionGate, PermissionPrompter};
use crate::hooks::{EventBus, HookHandler, LoggingHook};
use crate::llm::{ModelClient, OpenAiClient, ScriptedModelClient};
use crate::memory::{CheckpointStore, InMemoryCheckpointStore, JsonlCheckpointStore};
use crate::react::{AgentEngine, EngineConfig, Planner};
use crate::tools::{builtin_registry, ToolExecutor, ToolRegistry};

/// 根据配置与环境变量选择模型后端（DeepSeek / OpenAI 兼容 / Mock）
pub fn create_model_from_config(cfg: &AppConfig) -> Arc<dyn ModelClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = cfg.llm.timeouts.request;
    let has_deepseek_key = std::env::var("DEEPSEEK_API_KEY").is_ok();
    let has_openai_key = std::env::var("OPENAI_API_KEY").is_ok();

    match provider.as_str() {
        "deepseek" if has_deepseek_key || has_openai_key => {
            tracing::info!("Using DeepSeek LLM ({})", cfg.llm.model);
            Arc::new(OpenAiClient::deepseek(Some(&cfg.llm.model), timeout))
        }
        "openai" if has_openai_key => {
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
            Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                None,
                timeout,
            ))
        }
        "mock" => Arc::new(ScriptedModelClient::new()),
        _ => {
            tracing::warn!(provider = %provider, "No API key set or provider unknown, using Mock LLM");
            Arc::new(ScriptedModelClient::new())
        }
    }
}

/// 引擎构建器
pub struct EngineBuilder {
    config: AppConfig,
    model: Option<Arc<dyn ModelClient>>,
    registry: Option<ToolRegistry>,
    prompter: Option<Arc<dyn PermissionPrompter>>,
    store: Option<Arc<dyn CheckpointStore>>,
    events: EventBus,
}

impl EngineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            model: None,
            registry: None,
            prompter: None,
            store: None,
            events: EventBus::new(),
        }
    }

    pub fn with_model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_prompter(mut self, prompter: Arc<dyn PermissionPrompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 注册钩子处理器（编译期确定的处理器集合）
    pub fn with_hook(mut self, handler: impl HookHandler + 'static) -> Self {
        self.events.register(handler);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 工作目录：配置 > 当前目录
    pub fn workspace(&self) -> PathBuf {
        let root = self
            .config
            .tools
            .workspace_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        root.canonicalize().unwrap_or(root)
    }

    fn build_store(&self) -> anyhow::Result<Arc<dyn CheckpointStore>> {
        if let Some(store) = &self.store {
            return Ok(store.clone());
        }
        let store: Arc<dyn CheckpointStore> = match &self.config.checkpoint.dir {
            Some(dir) => Arc::new(JsonlCheckpointStore::new(dir)?),
            None => Arc::new(InMemoryCheckpointStore::new()),
        };
        Ok(store)
    }

    fn build_gate(&self) -> anyhow::Result<PermissionGate> {
        let perms = &self.config.permissions;
        let prompter: Arc<dyn PermissionPrompter> = match &self.prompter {
            Some(p) => p.clone(),
            None => Arc::new(DenyPrompter),
        };
        let mut gate = PermissionGate::new(perms.mode, prompter)
            .with_tool_permissions(perms.tool_permissions.clone())
            .with_permanent_rules(perms.approved_tools.clone(), perms.denied_tools.clone());
        if let Some(path) = &perms.store_path {
            gate = gate.with_store_path(path.clone())?;
        }
        Ok(gate)
    }

    /// 组装引擎；存储目录或权限文件无法打开时返回错误
    pub fn build(self) -> anyhow::Result<AgentEngine> {
        let store = self.build_store()?;
        let gate = self.build_gate()?;
        let registry = match &self.registry {
            Some(r) => r.clone(),
            None => builtin_registry(
                self.workspace(),
                self.config.tools.shell.allowed_commands.clone(),
            ),
        };
        let model = self
            .model
            .clone()
            .unwrap_or_else(|| create_model_from_config(&self.config));

        let engine_config = EngineConfig::from(&self.config.agent);
        let planner = Planner::new(
            model,
            engine_config.system_prompt.clone(),
            engine_config.max_tokens,
        );
        let executor = ToolExecutor::new(registry, self.config.tools.tool_timeout_secs)
            .with_max_retries(self.config.tools.max_retries);

        let mut events = self.events;
        if events.handler_count() == 0 {
            events.register(LoggingHook);
        }

        Ok(AgentEngine::new(
            planner,
            executor,
            gate,
            CheckpointManager::new(store),
            events,
            engine_config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PermissionMode;

    #[test]
    fn test_build_with_defaults_uses_in_memory_store() {
        let mut config = AppConfig::default();
        config.llm.provider = "mock".into();
        let dir = tempfile::tempdir().unwrap();
        config.tools.workspace_root = Some(dir.path().to_path_buf());
        let engine = EngineBuilder::new(config).build().unwrap();
        assert_eq!(engine.config().max_turns, 20);
        assert!(engine.checkpoints().list("none").unwrap().is_empty());
    }

    #[test]
    fn test_build_with_jsonl_store_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.llm.provider = "mock".into();
        config.checkpoint.dir = Some(dir.path().join("checkpoints"));
        config.permissions.mode = PermissionMode::AlwaysAsk;
        let mut engine = EngineBuilder::new(config)
            .with_registry(ToolRegistry::new())
            .build()
            .unwrap();
        assert!(dir.path().join("checkpoints").is_dir());
        assert_eq!(engine.gate_mut().mode(), PermissionMode::AlwaysAsk);
    }
}
