//! 工具层：注册表、执行协调（超时 / 重试 / 取消）与内置工具

pub mod echo;
pub mod executor;
pub mod filesystem;
pub mod process;
pub mod registry;
pub mod result;
pub mod retry;
pub mod schema;
pub mod shell;

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use filesystem::{GlobTool, ReadFileTool, SafeFs};
pub use process::ChildProcess;
pub use registry::{ProcessHandle, ProcessTool, Tool, ToolKind, ToolRegistry};
pub use result::{ToolOutcome, ToolResult};
pub use retry::{execute_with_smart_retry, is_retryable};
pub use schema::schema_for_params;
pub use shell::ShellTool;

use std::path::Path;

/// 内置工具集：echo / read_file / glob（进程内）+ shell（进程型）
pub fn builtin_registry(workspace_root: impl AsRef<Path>, allowed_commands: Vec<String>) -> ToolRegistry {
    let root = workspace_root.as_ref();
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    registry.register(ReadFileTool::new(root));
    registry.register(GlobTool::new(root));
    registry.register_process(ShellTool::new(allowed_commands).with_cwd(root));
    registry
}
