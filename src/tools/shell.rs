//! Shell 执行器：白名单命令，禁止危险操作
//!
//! 仅允许配置中的命令名（首词，如 ls、grep、cargo）；禁止 rm -rf、wget、chmod 777 等子串。
//! 作为进程型工具启动 `sh -c`，由 ToolExecutor 负责超时与取消时的强杀。

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::RiskLevel;
use crate::tools::process::ChildProcess;
use crate::tools::{schema_for_params, ProcessHandle, ProcessTool};

/// 禁止的命令/子串（即使白名单中有同名，也不允许带这些参数）
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "rm -r",
    "wget ",
    "curl | sh",
    "chmod 777",
    "chmod +s",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    ":(){ :|:& };:", // fork bomb
];

#[allow(dead_code)]
#[derive(Deserialize, JsonSchema)]
struct ShellParams {
    /// The shell command to execute (first word must be in the allowlist)
    command: String,
}

/// Shell 工具：仅允许白名单内命令
pub struct ShellTool {
    allowed_commands: HashSet<String>,
    cwd: Option<PathBuf>,
}

impl ShellTool {
    pub fn new(allowed_commands: Vec<String>) -> Self {
        let allowed_commands = allowed_commands
            .into_iter()
            .map(|s| s.to_lowercase())
            .collect();
        Self {
            allowed_commands,
            cwd: None,
        }
    }

    /// 命令在该目录下执行
    pub fn with_cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// 解析命令：只取第一个 token 作为命令名
    fn command_name<'a>(&self, raw: &'a str) -> &'a str {
        raw.split_whitespace().next().unwrap_or("")
    }

    fn is_allowed(&self, raw: &str) -> Result<(), String> {
        let raw_lower = raw.to_lowercase();
        for forbidden in FORBIDDEN_SUBSTR {
            if raw_lower.contains(forbidden) {
                return Err(format!("Forbidden pattern: {}", forbidden));
            }
        }
        let name = self.command_name(&raw_lower);
        if name.is_empty() {
            return Err("Empty command".to_string());
        }
        if self.allowed_commands.contains(name) {
            return Ok(());
        }
        Err(format!("Command '{}' not in allowlist", name))
    }
}

impl ProcessTool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a whitelisted shell command in the workspace. Allowed commands are configurable (ls, grep, cat, head, tail, wc, find, cargo, rustc by default)."
    }

    fn parameters_schema(&self) -> Value {
        schema_for_params::<ShellParams>()
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Dangerous
    }

    fn start(&self, args: &Value) -> Result<Box<dyn ProcessHandle>, String> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        self.is_allowed(command)?;

        tracing::info!(command = %command, "shell tool start");
        let child = ChildProcess::spawn_shell(command, self.cwd.as_deref())?;
        Ok(Box::new(child))
    }
}
