//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE__*` 覆盖（双下划线表示嵌套，如 `BEE__AGENT__MAX_TURNS=10`）。
//! 命令行参数（权限模式）在加载完成后由 main 覆盖。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::core::{PermissionMode, ToolRule};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub llm: LlmSection,
    pub permissions: PermissionsSection,
    pub tools: ToolsSection,
    pub checkpoint: CheckpointSection,
    pub logging: LoggingSection,
}

/// [agent] 段：回合上限、单次生成 token 上限、同一回合内的恢复次数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_turns: u32,
    pub max_tokens: u32,
    pub max_recovery_attempts: u32,
    pub system_prompt: String,
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Bee, a coding assistant. Use the provided tools when you need to inspect the workspace, then answer concisely.";

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_turns: 20,
            max_tokens: 4096,
            max_recovery_attempts: 2,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [permissions] 段：全局模式、按工具覆盖、永久允许 / 拒绝列表及其持久化文件
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PermissionsSection {
    pub mode: PermissionMode,
    pub tool_permissions: HashMap<String, ToolRule>,
    pub approved_tools: Vec<String>,
    pub denied_tools: Vec<String>,
    /// 「always / never」答复写入的文件；未设置则只在进程内生效
    pub store_path: Option<PathBuf>,
}

/// [tools] 段：工作目录、进程型工具超时、重试次数、Shell 白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 沙箱根目录，未设置时用当前目录
    pub workspace_root: Option<PathBuf>,
    /// 单次进程型工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 进程内工具的最大尝试次数
    pub max_retries: u32,
    pub shell: ShellSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            workspace_root: None,
            tool_timeout_secs: 120,
            max_retries: 2,
            shell: ShellSection::default(),
        }
    }
}

/// [tools.shell] 段：允许执行的命令名（仅首词，如 ls、grep、cargo）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub allowed_commands: Vec<String>,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allowed_commands: vec![
                "ls".into(),
                "grep".into(),
                "cat".into(),
                "head".into(),
                "tail".into(),
                "wc".into(),
                "find".into(),
                "cargo".into(),
                "rustc".into(),
            ],
        }
    }
}

/// [checkpoint] 段：JSONL 检查点目录；未设置时检查点只保存在内存
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckpointSection {
    pub dir: Option<PathBuf>,
}

/// [logging] 段：默认日志级别（RUST_LOG 优先）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 BEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
