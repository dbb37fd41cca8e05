//! 沙箱文件系统工具
//!
//! SafeFs 绑定 root_dir，所有路径经 resolve 校验必须在 root 下（禁止 ../ 逃逸）；
//! ReadFileTool / GlobTool 基于 SafeFs 提供只读能力，风险等级为 Safe。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::RiskLevel;
use crate::tools::{schema_for_params, Tool};

/// Glob 默认最多返回的条数
const DEFAULT_GLOB_LIMIT: usize = 200;

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 检查路径是否在沙箱内
    pub fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let path = path.trim_start_matches("./");
        let full = self.root_dir.join(path);
        let canonical = full
            .canonicalize()
            .map_err(|_| format!("Path not found: {}", path))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(format!("Permission denied: path escapes workspace: {}", path)) // 如 ../../etc/passwd
        }
    }

    pub fn read_file(&self, path: &str) -> Result<String, String> {
        let resolved = self.resolve(path)?;
        std::fs::read_to_string(&resolved).map_err(|e| format!("Read failed: {}", e))
    }

    /// 按 glob 模式匹配根目录下的文件，返回排序后的相对路径
    pub fn glob(&self, pattern: &str, limit: usize) -> Result<Vec<String>, String> {
        let pattern = pattern.trim().trim_start_matches("./");
        if pattern.is_empty() {
            return Err("Invalid syntax: empty pattern".to_string());
        }
        if Path::new(pattern).is_absolute() || pattern.split('/').any(|p| p == "..") {
            return Err(format!("Permission denied: pattern escapes workspace: {}", pattern));
        }
        let root = glob::Pattern::escape(&self.root_dir.to_string_lossy());
        let full = format!("{}/{}", root.trim_end_matches('/'), pattern);
        let paths = glob::glob(&full).map_err(|e| format!("Invalid syntax: {}", e))?;

        let mut matches: Vec<String> = paths
            .filter_map(Result::ok)
            .filter_map(|p| {
                p.strip_prefix(&self.root_dir)
                    .ok()
                    .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            })
            .collect();
        matches.sort();
        matches.truncate(limit);
        Ok(matches)
    }
}

#[allow(dead_code)]
#[derive(Deserialize, JsonSchema)]
struct ReadFileParams {
    /// File path relative to the workspace root
    path: String,
}

/// 读取文件内容
pub struct ReadFileTool {
    fs: SafeFs,
}

impl ReadFileTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read file contents. Args: {\"path\": \"file path relative to workspace\"}"
    }

    fn parameters_schema(&self) -> Value {
        schema_for_params::<ReadFileParams>()
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Safe
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or("");
        tracing::info!(path = %path, "read_file tool execute");
        self.fs.read_file(path)
    }
}

#[allow(dead_code)]
#[derive(Deserialize, JsonSchema)]
struct GlobParams {
    /// Glob pattern relative to the workspace root, e.g. "src/**/*.rs"
    pattern: String,
    /// Maximum number of paths to return (default 200)
    limit: Option<usize>,
}

/// Glob 工具：按模式列出文件
pub struct GlobTool {
    fs: SafeFs,
}

impl GlobTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files by glob pattern. Args: {\"pattern\": \"src/**/*.rs\", \"limit\": 200}"
    }

    fn parameters_schema(&self) -> Value {
        schema_for_params::<GlobParams>()
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Safe
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let pattern = args.get("pattern").and_then(|v| v.as_str()).unwrap_or("");
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_GLOB_LIMIT);
        tracing::info!(pattern = %pattern, "glob tool execute");
        let matches = self.fs.glob(pattern, limit)?;
        if matches.is_empty() {
            Ok(format!("No files matched '{}'", pattern))
        } else {
            Ok(matches.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn a() {}").unwrap();
        std::fs::write(dir.path().join("src/nested/mod.rs"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "# readme").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_glob_matches_recursive_pattern() {
        let dir = workspace();
        let tool = GlobTool::new(dir.path());
        let out = tool.execute(json!({"pattern": "**/*.rs"})).await.unwrap();
        assert_eq!(out, "src/lib.rs\nsrc/nested/mod.rs");
    }

    #[tokio::test]
    async fn test_glob_no_matches_is_success() {
        let dir = workspace();
        let tool = GlobTool::new(dir.path());
        let out = tool.execute(json!({"pattern": "*.py"})).await.unwrap();
        assert!(out.starts_with("No files matched"));
    }

    #[tokio::test]
    async fn test_glob_rejects_parent_traversal() {
        let dir = workspace();
        let tool = GlobTool::new(dir.path());
        let err = tool.execute(json!({"pattern": "../*"})).await.unwrap_err();
        assert!(err.contains("Permission denied"));
    }

    #[tokio::test]
    async fn test_read_file_inside_root() {
        let dir = workspace();
        let tool = ReadFileTool::new(dir.path());
        let out = tool.execute(json!({"path": "./README.md"})).await.unwrap();
        assert_eq!(out, "# readme");
    }

    #[tokio::test]
    async fn test_read_missing_file_is_not_found() {
        let dir = workspace();
        let tool = ReadFileTool::new(dir.path());
        let err = tool.execute(json!({"path": "missing.txt"})).await.unwrap_err();
        assert!(err.contains("not found"));
    }

    #[test]
    fn test_resolve_blocks_escape() {
        let dir = workspace();
        let fs = SafeFs::new(dir.path().join("src"));
        let err = fs.resolve("../README.md").unwrap_err();
        assert!(err.contains("escapes workspace"));
    }
}
