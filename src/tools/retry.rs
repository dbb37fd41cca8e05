//! 进程内工具的有限重试
//!
//! 失败信息命中不可重试子串（大小写不敏感）时立即返回；其余失败按 0.5s * 尝试序号线性退避，
//! 最多 max_retries 次尝试。全部失败时 metadata 记录尝试次数与最后一次错误。

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde_json::Value;

use crate::tools::{Tool, ToolResult};

/// 不可重试错误：文件 / 权限 / 语法类，重试也不会变好
static NON_RETRYABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)not found|permission denied|invalid syntax|does not exist")
        .expect("non-retryable pattern is a valid regex")
});

/// 线性退避基数
const BACKOFF_STEP: Duration = Duration::from_millis(500);

pub const DEFAULT_MAX_RETRIES: u32 = 2;

pub fn is_retryable(error: &str) -> bool {
    !NON_RETRYABLE.is_match(error)
}

/// 第 attempt 次失败后的等待时长
pub fn backoff_for(attempt: u32) -> Duration {
    BACKOFF_STEP * attempt
}

/// 带分类的有限重试；返回的 ToolResult 总带 attempts 元数据
pub async fn execute_with_smart_retry(
    tool: Arc<dyn Tool>,
    params: Value,
    max_retries: u32,
) -> ToolResult {
    let max_attempts = max_retries.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match tool.execute(params.clone()).await {
            Ok(output) => {
                return ToolResult::success(output).with_meta("attempts", attempt);
            }
            Err(e) => {
                last_error = e;
                if !is_retryable(&last_error) {
                    tracing::debug!(tool = tool.name(), attempt, error = %last_error, "non-retryable tool error");
                    return ToolResult::failure(last_error.clone())
                        .with_meta("attempts", attempt)
                        .with_meta("retryable", false);
                }
                if attempt < max_attempts {
                    tracing::warn!(tool = tool.name(), attempt, error = %last_error, "tool failed, retrying");
                    tokio::time::sleep(backoff_for(attempt)).await;
                }
            }
        }
    }

    ToolResult::failure(format!(
        "Tool '{}' failed after {} attempts: {}",
        tool.name(),
        max_attempts,
        last_error
    ))
    .with_meta("attempts", max_attempts)
    .with_meta("last_error", last_error)
    .with_meta("retryable", true)
}
