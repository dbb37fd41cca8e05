//! 检查点记录
//!
//! 一条检查点 = 执行 id + 步骤名 + 步骤序号 + state/context/variables 三段 JSON 快照。
//! 步骤序号在同一执行内单调；回合检查点取整数，工具批次检查点取半整数（N + 0.5）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 检查点状态
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    #[default]
    Success,
    Failed,
}

/// 写入后不可变的检查点
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub execution_id: String,
    pub step_name: String,
    pub step_index: f64,
    pub state: Value,
    pub context: Value,
    pub variables: Value,
    pub status: CheckpointStatus,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        execution_id: impl Into<String>,
        step_name: impl Into<String>,
        step_index: f64,
        state: Value,
        context: Value,
        variables: Value,
        status: CheckpointStatus,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            step_name: step_name.into(),
            step_index,
            state,
            context,
            variables,
            status,
            created_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CheckpointStatus::Success
    }
}

/// 按步骤序号排序（稳定排序，同序号保留写入顺序，后写者覆盖前者）
pub fn sort_by_step(checkpoints: &mut [Checkpoint]) {
    checkpoints.sort_by(|a, b| a.step_index.total_cmp(&b.step_index));
}

/// 最后一个 step_index <= target 的成功检查点；输入需已按步骤排序
pub fn last_at_or_before(checkpoints: &[Checkpoint], target: f64) -> Option<&Checkpoint> {
    checkpoints
        .iter()
        .rev()
        .find(|c| c.is_success() && c.step_index <= target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cp(step: f64) -> Checkpoint {
        Checkpoint::new(
            "exec",
            format!("step_{step}"),
            step,
            json!({"turn": step}),
            json!({}),
            json!({}),
            CheckpointStatus::Success,
        )
    }

    #[test]
    fn test_last_at_or_before_picks_half_step() {
        let mut all = vec![cp(2.0), cp(1.0), cp(1.5)];
        sort_by_step(&mut all);
        assert_eq!(last_at_or_before(&all, 1.7).unwrap().step_index, 1.5);
        assert_eq!(last_at_or_before(&all, 2.0).unwrap().step_index, 2.0);
        assert!(last_at_or_before(&all, 0.5).is_none());
    }

    #[test]
    fn test_failed_checkpoints_are_skipped() {
        let mut failed = cp(2.0);
        failed.status = CheckpointStatus::Failed;
        let all = vec![cp(1.0), failed];
        assert_eq!(last_at_or_before(&all, 2.0).unwrap().step_index, 1.0);
    }

    #[test]
    fn test_superseding_checkpoint_wins() {
        let mut later = cp(1.0);
        later.step_name = "superseded".into();
        let mut all = vec![cp(1.0), later];
        sort_by_step(&mut all);
        assert_eq!(last_at_or_before(&all, 1.0).unwrap().step_name, "superseded");
    }
}
