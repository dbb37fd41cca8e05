//! 权限闸门
//!
//! 每个工具调用在执行前经过 decide()。判定顺序即优先级，先命中者生效：
//! 全局放行模式 > 工具级覆盖 > 永久拒绝 > 永久允许 > 会话拒绝 > 会话允许 > 安全工具自动放行 > 询问操作员。
//! 拒绝总带原因，允许从不带原因。

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 全局权限模式（对应 CLI 的三个开关）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// --always-ask：除显式规则外一律询问
    AlwaysAsk,
    /// 默认：风险为 safe 的工具自动放行
    #[default]
    AutoApproveSafe,
    /// --auto-approve-all
    AutoApproveAll,
    /// --dangerously-skip-permissions
    SkipAll,
}

/// 工具静态风险等级
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Safe,
    #[default]
    Normal,
    Dangerous,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Normal => "normal",
            RiskLevel::Dangerous => "dangerous",
        }
    }
}

/// 配置里的工具级覆盖规则
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolRule {
    Allow,
    Deny,
}

/// 判定结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PermissionDecision {
    Approved,
    Denied(String),
}

impl PermissionDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, PermissionDecision::Approved)
    }

    /// 拒绝原因；允许时为 None
    pub fn message(&self) -> Option<&str> {
        match self {
            PermissionDecision::Approved => None,
            PermissionDecision::Denied(reason) => Some(reason),
        }
    }
}

/// 操作员对一次询问的回答
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptResponse {
    Yes,
    No,
    /// 永久允许该工具
    Always,
    /// 永久拒绝该工具
    Never,
    /// 本会话内允许该工具（reset 后失效）
    Session,
    /// 本会话内拒绝该工具
    SessionDeny,
    /// 询问被打断（EOF / Ctrl+C），按拒绝处理
    Interrupted,
}

/// 询问回调（终端交互由实现方负责）
#[async_trait]
pub trait PermissionPrompter: Send + Sync {
    async fn prompt(&self, tool_name: &str, risk: RiskLevel, params: &Value) -> PromptResponse;
}

/// 没有操作员时的回调：一律视为打断
#[derive(Debug, Default)]
pub struct DenyPrompter;

#[async_trait]
impl PermissionPrompter for DenyPrompter {
    async fn prompt(&self, _tool_name: &str, _risk: RiskLevel, _params: &Value) -> PromptResponse {
        PromptResponse::Interrupted
    }
}

/// 永久规则的落盘格式
#[derive(Debug, Default, Serialize, Deserialize)]
struct PermanentRules {
    #[serde(default)]
    approved_tools: BTreeSet<String>,
    #[serde(default)]
    denied_tools: BTreeSet<String>,
}

/// 权限闸门：由运行循环独占，逐个工具调用顺序判定
pub struct PermissionGate {
    mode: PermissionMode,
    tool_permissions: HashMap<String, ToolRule>,
    permanent_approved: BTreeSet<String>,
    permanent_denied: BTreeSet<String>,
    session_approved: BTreeSet<String>,
    session_denied: BTreeSet<String>,
    prompter: Arc<dyn PermissionPrompter>,
    /// 永久规则文件；None 时只保存在内存
    store_path: Option<PathBuf>,
}

impl PermissionGate {
    pub fn new(mode: PermissionMode, prompter: Arc<dyn PermissionPrompter>) -> Self {
        Self {
            mode,
            tool_permissions: HashMap::new(),
            permanent_approved: BTreeSet::new(),
            permanent_denied: BTreeSet::new(),
            session_approved: BTreeSet::new(),
            session_denied: BTreeSet::new(),
            prompter,
            store_path: None,
        }
    }

    pub fn with_tool_permissions(mut self, rules: HashMap<String, ToolRule>) -> Self {
        self.tool_permissions = rules;
        self
    }

    pub fn with_permanent_rules(
        mut self,
        approved: impl IntoIterator<Item = String>,
        denied: impl IntoIterator<Item = String>,
    ) -> Self {
        self.permanent_approved.extend(approved);
        self.permanent_denied.extend(denied);
        self
    }

    /// 绑定永久规则文件：已有内容合并进来，之后 always / never 会回写
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            let rules: PermanentRules = serde_json::from_str(&data)?;
            self.permanent_approved.extend(rules.approved_tools);
            self.permanent_denied.extend(rules.denied_tools);
        }
        self.store_path = Some(path);
        Ok(self)
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PermissionMode) {
        self.mode = mode;
    }

    pub fn approve_for_session(&mut self, tool_name: &str) {
        self.session_denied.remove(tool_name);
        self.session_approved.insert(tool_name.to_string());
    }

    pub fn deny_for_session(&mut self, tool_name: &str) {
        self.session_approved.remove(tool_name);
        self.session_denied.insert(tool_name.to_string());
    }

    pub fn clear_session(&mut self) {
        self.session_approved.clear();
        self.session_denied.clear();
    }

    pub fn is_permanently_approved(&self, tool_name: &str) -> bool {
        self.permanent_approved.contains(tool_name)
    }

    pub fn is_permanently_denied(&self, tool_name: &str) -> bool {
        self.permanent_denied.contains(tool_name)
    }

    /// 对一次工具调用做出判定（可能经由询问回调）
    pub async fn decide(
        &mut self,
        tool_name: &str,
        risk: RiskLevel,
        params: &Value,
    ) -> PermissionDecision {
        if let Some(decision) = self.evaluate_rules(tool_name, risk) {
            tracing::debug!(tool = tool_name, approved = decision.is_approved(), "permission rule matched");
            return decision;
        }

        let response = self.prompter.prompt(tool_name, risk, params).await;
        tracing::info!(tool = tool_name, ?response, "permission prompt answered");
        match response {
            PromptResponse::Yes => PermissionDecision::Approved,
            PromptResponse::No => {
                PermissionDecision::Denied(format!("User denied permission for tool '{tool_name}'"))
            }
            PromptResponse::Always => {
                self.permanent_denied.remove(tool_name);
                self.permanent_approved.insert(tool_name.to_string());
                self.persist();
                PermissionDecision::Approved
            }
            PromptResponse::Never => {
                self.permanent_approved.remove(tool_name);
                self.permanent_denied.insert(tool_name.to_string());
                self.persist();
                PermissionDecision::Denied(format!(
                    "User permanently denied tool '{tool_name}'"
                ))
            }
            PromptResponse::Session => {
                self.approve_for_session(tool_name);
                PermissionDecision::Approved
            }
            PromptResponse::SessionDeny => {
                self.deny_for_session(tool_name);
                PermissionDecision::Denied(format!(
                    "User denied tool '{tool_name}' for this session"
                ))
            }
            PromptResponse::Interrupted => PermissionDecision::Denied(format!(
                "Permission prompt for tool '{tool_name}' was interrupted"
            )),
        }
    }

    /// 规则 1-7；都未命中时返回 None，需要询问
    fn evaluate_rules(&self, tool_name: &str, risk: RiskLevel) -> Option<PermissionDecision> {
        if matches!(self.mode, PermissionMode::SkipAll | PermissionMode::AutoApproveAll) {
            return Some(PermissionDecision::Approved);
        }
        if let Some(rule) = self.tool_permissions.get(tool_name) {
            return Some(match rule {
                ToolRule::Allow => PermissionDecision::Approved,
                ToolRule::Deny => PermissionDecision::Denied(format!(
                    "Tool '{tool_name}' is denied by configuration"
                )),
            });
        }
        if self.permanent_denied.contains(tool_name) {
            return Some(PermissionDecision::Denied(format!(
                "Tool '{tool_name}' is in the permanently denied list"
            )));
        }
        if self.permanent_approved.contains(tool_name) {
            return Some(PermissionDecision::Approved);
        }
        if self.session_denied.contains(tool_name) {
            return Some(PermissionDecision::Denied(format!(
                "Tool '{tool_name}' is denied for this session"
            )));
        }
        if self.session_approved.contains(tool_name) {
            return Some(PermissionDecision::Approved);
        }
        if self.mode == PermissionMode::AutoApproveSafe && risk == RiskLevel::Safe {
            return Some(PermissionDecision::Approved);
        }
        None
    }

    fn persist(&self) {
        let Some(path) = &self.store_path else {
            return;
        };
        let rules = PermanentRules {
            approved_tools: self.permanent_approved.clone(),
            denied_tools: self.permanent_denied.clone(),
        };
        let result = (|| -> anyhow::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_string_pretty(&rules)?)?;
            Ok(())
        })();
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), "failed to persist permission rules: {e:#}");
        }
    }
}

/// 终端询问：读取一行 y / n / a(lways) / never；EOF 或读取失败视为打断
#[derive(Debug, Default)]
pub struct StdinPrompter;

#[async_trait]
impl PermissionPrompter for StdinPrompter {
    async fn prompt(&self, tool_name: &str, risk: RiskLevel, params: &Value) -> PromptResponse {
        let question = format!(
            "\nTool '{tool_name}' ({}) wants to run with {params}\nAllow? [y]es / [n]o / [s]ession / [d]eny for session / [a]lways / never: ",
            risk.as_str()
        );
        let answer = tokio::task::spawn_blocking(move || {
            use std::io::Write;
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(question.as_bytes());
            let _ = stdout.flush();
            let mut line = String::new();
            match std::io::stdin().read_line(&mut line) {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(line),
            }
        })
        .await
        .ok()
        .flatten();

        match answer {
            Some(line) => parse_prompt_answer(&line),
            None => PromptResponse::Interrupted,
        }
    }
}

/// 解析操作员输入；无法识别的回答按拒绝处理
pub fn parse_prompt_answer(line: &str) -> PromptResponse {
    match line.trim().to_lowercase().as_str() {
        "y" | "yes" => PromptResponse::Yes,
        "a" | "always" => PromptResponse::Always,
        "s" | "session" => PromptResponse::Session,
        "d" | "deny" => PromptResponse::SessionDeny,
        "never" => PromptResponse::Never,
        _ => PromptResponse::No,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedPrompter {
        response: PromptResponse,
        calls: AtomicUsize,
    }

    impl FixedPrompter {
        fn new(response: PromptResponse) -> Arc<Self> {
            Arc::new(Self {
                response,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PermissionPrompter for FixedPrompter {
        async fn prompt(&self, _: &str, _: RiskLevel, _: &Value) -> PromptResponse {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response
        }
    }

    fn params() -> Value {
        serde_json::json!({"command": "ls"})
    }

    #[tokio::test]
    async fn test_skip_all_and_auto_approve_all_approve_everything() {
        for mode in [PermissionMode::SkipAll, PermissionMode::AutoApproveAll] {
            let prompter = FixedPrompter::new(PromptResponse::No);
            let mut gate = PermissionGate::new(mode, prompter.clone())
                .with_tool_permissions(HashMap::from([("shell".to_string(), ToolRule::Deny)]))
                .with_permanent_rules(Vec::new(), ["shell".to_string()]);
            let d = gate.decide("shell", RiskLevel::Dangerous, &params()).await;
            assert_eq!(d, PermissionDecision::Approved);
            assert!(d.message().is_none());
            assert_eq!(prompter.calls.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn test_tool_override_beats_permanent_allow() {
        let mut gate = PermissionGate::new(PermissionMode::AlwaysAsk, Arc::new(DenyPrompter))
            .with_tool_permissions(HashMap::from([("shell".to_string(), ToolRule::Deny)]))
            .with_permanent_rules(["shell".to_string()], Vec::new());
        let d = gate.decide("shell", RiskLevel::Dangerous, &params()).await;
        assert!(!d.is_approved());
        assert!(d.message().unwrap().contains("denied by configuration"));
    }

    #[tokio::test]
    async fn test_tool_override_allow_beats_permanent_deny() {
        let mut gate = PermissionGate::new(PermissionMode::AlwaysAsk, Arc::new(DenyPrompter))
            .with_tool_permissions(HashMap::from([("shell".to_string(), ToolRule::Allow)]))
            .with_permanent_rules(Vec::new(), ["shell".to_string()]);
        assert!(gate.decide("shell", RiskLevel::Dangerous, &params()).await.is_approved());
    }

    #[tokio::test]
    async fn test_permanent_deny_beats_permanent_allow_and_session() {
        let mut gate = PermissionGate::new(PermissionMode::AutoApproveSafe, Arc::new(DenyPrompter))
            .with_permanent_rules(["glob".to_string()], ["glob".to_string()]);
        gate.approve_for_session("glob");
        let d = gate.decide("glob", RiskLevel::Safe, &params()).await;
        assert!(d.message().unwrap().contains("permanently denied"));
    }

    #[tokio::test]
    async fn test_session_rules() {
        let prompter = FixedPrompter::new(PromptResponse::Yes);
        let mut gate = PermissionGate::new(PermissionMode::AlwaysAsk, prompter.clone());
        gate.deny_for_session("shell");
        let d = gate.decide("shell", RiskLevel::Normal, &params()).await;
        assert!(d.message().unwrap().contains("session"));

        gate.approve_for_session("shell");
        assert!(gate.decide("shell", RiskLevel::Normal, &params()).await.is_approved());
        assert_eq!(prompter.calls.load(Ordering::SeqCst), 0);

        gate.clear_session();
        assert!(gate.decide("shell", RiskLevel::Normal, &params()).await.is_approved());
        assert_eq!(prompter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_session_answers_are_remembered_until_cleared() {
        let allow = FixedPrompter::new(PromptResponse::Session);
        let mut gate = PermissionGate::new(PermissionMode::AlwaysAsk, allow.clone());
        assert!(gate.decide("shell", RiskLevel::Dangerous, &params()).await.is_approved());
        assert!(gate.decide("shell", RiskLevel::Dangerous, &params()).await.is_approved());
        assert_eq!(allow.calls.load(Ordering::SeqCst), 1);
        assert!(!gate.is_permanently_approved("shell"));

        gate.clear_session();
        gate.decide("shell", RiskLevel::Dangerous, &params()).await;
        assert_eq!(allow.calls.load(Ordering::SeqCst), 2);

        let deny = FixedPrompter::new(PromptResponse::SessionDeny);
        let mut gate = PermissionGate::new(PermissionMode::AlwaysAsk, deny.clone());
        let first = gate.decide("shell", RiskLevel::Normal, &params()).await;
        assert!(first.message().unwrap().contains("for this session"));
        let second = gate.decide("shell", RiskLevel::Normal, &params()).await;
        assert!(second.message().unwrap().contains("denied for this session"));
        assert_eq!(deny.calls.load(Ordering::SeqCst), 1);
        assert!(!gate.is_permanently_denied("shell"));
    }

    #[tokio::test]
    async fn test_auto_approve_safe_only_for_safe_tools() {
        let prompter = FixedPrompter::new(PromptResponse::No);
        let mut gate = PermissionGate::new(PermissionMode::AutoApproveSafe, prompter.clone());
        assert!(gate.decide("glob", RiskLevel::Safe, &params()).await.is_approved());
        assert_eq!(prompter.calls.load(Ordering::SeqCst), 0);

        let d = gate.decide("shell", RiskLevel::Normal, &params()).await;
        assert!(!d.is_approved());
        assert_eq!(prompter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_always_ask_prompts_even_for_safe_tools() {
        let prompter = FixedPrompter::new(PromptResponse::Yes);
        let mut gate = PermissionGate::new(PermissionMode::AlwaysAsk, prompter.clone());
        assert!(gate.decide("glob", RiskLevel::Safe, &params()).await.is_approved());
        assert_eq!(prompter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_always_and_never_update_permanent_sets() {
        let mut gate = PermissionGate::new(
            PermissionMode::AlwaysAsk,
            FixedPrompter::new(PromptResponse::Always),
        );
        assert!(gate.decide("shell", RiskLevel::Dangerous, &params()).await.is_approved());
        assert!(gate.is_permanently_approved("shell"));

        let mut gate = PermissionGate::new(
            PermissionMode::AlwaysAsk,
            FixedPrompter::new(PromptResponse::Never),
        );
        assert!(!gate.decide("shell", RiskLevel::Dangerous, &params()).await.is_approved());
        assert!(gate.is_permanently_denied("shell"));
    }

    #[tokio::test]
    async fn test_yes_affects_only_this_call() {
        let prompter = FixedPrompter::new(PromptResponse::Yes);
        let mut gate = PermissionGate::new(PermissionMode::AlwaysAsk, prompter.clone());
        gate.decide("shell", RiskLevel::Normal, &params()).await;
        gate.decide("shell", RiskLevel::Normal, &params()).await;
        assert_eq!(prompter.calls.load(Ordering::SeqCst), 2);
        assert!(!gate.is_permanently_approved("shell"));
    }

    #[tokio::test]
    async fn test_interrupted_prompt_denies_with_reason() {
        let mut gate = PermissionGate::new(PermissionMode::AlwaysAsk, Arc::new(DenyPrompter));
        let d = gate.decide("shell", RiskLevel::Normal, &params()).await;
        assert!(d.message().unwrap().contains("interrupted"));
    }

    #[tokio::test]
    async fn test_permanent_rules_persist_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.json");
        let mut gate = PermissionGate::new(
            PermissionMode::AlwaysAsk,
            FixedPrompter::new(PromptResponse::Always),
        )
        .with_store_path(&path)
        .unwrap();
        gate.decide("read_file", RiskLevel::Normal, &params()).await;

        let reloaded = PermissionGate::new(PermissionMode::AlwaysAsk, Arc::new(DenyPrompter))
            .with_store_path(&path)
            .unwrap();
        assert!(reloaded.is_permanently_approved("read_file"));
    }

    #[test]
    fn test_parse_prompt_answer() {
        assert_eq!(parse_prompt_answer("y\n"), PromptResponse::Yes);
        assert_eq!(parse_prompt_answer(" Always "), PromptResponse::Always);
        assert_eq!(parse_prompt_answer("never"), PromptResponse::Never);
        assert_eq!(parse_prompt_answer("s"), PromptResponse::Session);
        assert_eq!(parse_prompt_answer("Deny\n"), PromptResponse::SessionDeny);
        assert_eq!(parse_prompt_answer("maybe"), PromptResponse::No);
    }
}
