//! 检查点与恢复管理
//!
//! 运行循环每个回合、每个工具批次之后调用 create_checkpoint 追加记录；
//! 回合边界捕获到错误时调用 retry_from_step，找到序号不大于失败步骤的最后一个检查点并回填到引擎上。
//! 每次失败只恢复一次，是否继续重试由运行循环决定。

use std::sync::Arc;

use serde_json::Value;

use crate::core::checkpoint::{last_at_or_before, Checkpoint, CheckpointStatus};
use crate::core::AgentError;
use crate::memory::CheckpointStore;

/// 可从检查点恢复的对象（运行循环中的引擎）
pub trait Recoverable {
    fn restore_from_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), AgentError>;
}

/// 一次恢复尝试的结果（不持久化）
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub resumed_from: Option<Checkpoint>,
    pub error: Option<String>,
}

impl ExecutionResult {
    fn resumed(checkpoint: Checkpoint) -> Self {
        Self {
            success: true,
            resumed_from: Some(checkpoint),
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            resumed_from: None,
            error: Some(error.into()),
        }
    }
}

/// 检查点管理器：唯一的检查点写入方，存储后端可替换
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// 追加检查点；持久化失败原样上抛
    #[allow(clippy::too_many_arguments)]
    pub fn create_checkpoint(
        &self,
        execution_id: &str,
        step_name: &str,
        step_index: f64,
        state: Value,
        context: Value,
        variables: Value,
        status: CheckpointStatus,
    ) -> Result<Checkpoint, AgentError> {
        let record = Checkpoint::new(
            execution_id,
            step_name,
            step_index,
            state,
            context,
            variables,
            status,
        );
        self.store
            .save_checkpoint(&record)
            .map_err(|e| AgentError::Checkpoint(format!("save {step_name}@{step_index}: {e:#}")))?;
        tracing::debug!(execution_id, step_name, step_index, "checkpoint written");
        Ok(record)
    }

    /// 序号不大于 step_index 的最后一个成功检查点
    pub fn last_checkpoint_at_or_before(
        &self,
        execution_id: &str,
        step_index: f64,
    ) -> Result<Option<Checkpoint>, AgentError> {
        let list = self
            .store
            .list_checkpoints(execution_id)
            .map_err(|e| AgentError::Checkpoint(format!("list {execution_id}: {e:#}")))?;
        Ok(last_at_or_before(&list, step_index).cloned())
    }

    pub fn list(&self, execution_id: &str) -> Result<Vec<Checkpoint>, AgentError> {
        self.store
            .list_checkpoints(execution_id)
            .map_err(|e| AgentError::Checkpoint(format!("list {execution_id}: {e:#}")))
    }

    /// 从不晚于 step_index 的最后一个检查点恢复 agent
    pub fn retry_from_step<R: Recoverable + ?Sized>(
        &self,
        execution_id: &str,
        step_index: f64,
        agent: &mut R,
    ) -> ExecutionResult {
        let checkpoint = match self.last_checkpoint_at_or_before(execution_id, step_index) {
            Ok(Some(c)) => c,
            Ok(None) => {
                tracing::warn!(execution_id, step_index, "no checkpoint to resume from");
                return ExecutionResult::failed(format!(
                    "no checkpoint at or before step {step_index}"
                ));
            }
            Err(e) => return ExecutionResult::failed(e.to_string()),
        };

        match agent.restore_from_checkpoint(&checkpoint) {
            Ok(()) => {
                tracing::info!(
                    execution_id,
                    requested = step_index,
                    resumed = checkpoint.step_index,
                    step_name = %checkpoint.step_name,
                    "resumed from checkpoint"
                );
                ExecutionResult::resumed(checkpoint)
            }
            Err(e) => ExecutionResult::failed(format!(
                "restore {}@{} failed: {e}",
                checkpoint.step_name, checkpoint.step_index
            )),
        }
    }
}
