//! 检查点持久化
//!
//! CheckpointStore 是外部持久化后端的契约：按执行 id 追加、按步骤序号读回、列表按序号排序，
//! 并保证 state/context/variables 三段 JSON 往返无损。提供内存实现与 JSONL 文件实现。

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;

use crate::core::checkpoint::{sort_by_step, Checkpoint};

/// 检查点存储后端
pub trait CheckpointStore: Send + Sync {
    /// 追加一条检查点；同序号的旧记录保留，后写者在读取时生效
    fn save_checkpoint(&self, record: &Checkpoint) -> anyhow::Result<()>;

    /// 读取指定序号的检查点（同序号取最后写入的那条）
    fn load_checkpoint(&self, execution_id: &str, step_index: f64)
        -> anyhow::Result<Option<Checkpoint>>;

    /// 列出某执行的全部检查点，按序号升序
    fn list_checkpoints(&self, execution_id: &str) -> anyhow::Result<Vec<Checkpoint>>;
}

/// 内存存储：测试与未配置 checkpoint.dir 时使用
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    records: Mutex<HashMap<String, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save_checkpoint(&self, record: &Checkpoint) -> anyhow::Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("checkpoint store lock poisoned"))?;
        records
            .entry(record.execution_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn load_checkpoint(
        &self,
        execution_id: &str,
        step_index: f64,
    ) -> anyhow::Result<Option<Checkpoint>> {
        Ok(self
            .list_checkpoints(execution_id)?
            .into_iter()
            .rev()
            .find(|c| c.step_index == step_index))
    }

    fn list_checkpoints(&self, execution_id: &str) -> anyhow::Result<Vec<Checkpoint>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("checkpoint store lock poisoned"))?;
        let mut list = records.get(execution_id).cloned().unwrap_or_default();
        sort_by_step(&mut list);
        Ok(list)
    }
}

/// JSONL 文件存储：每个执行一个文件 `<dir>/<execution_id>.jsonl`，每行一条检查点
#[derive(Debug)]
pub struct JsonlCheckpointStore {
    dir: PathBuf,
}

impl JsonlCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create checkpoint dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn file_for(&self, execution_id: &str) -> PathBuf {
        let safe: String = execution_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.jsonl"))
    }
}

impl CheckpointStore for JsonlCheckpointStore {
    fn save_checkpoint(&self, record: &Checkpoint) -> anyhow::Result<()> {
        let path = self.file_for(&record.execution_id);
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        // 单次 write_all 追加整行
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    fn load_checkpoint(
        &self,
        execution_id: &str,
        step_index: f64,
    ) -> anyhow::Result<Option<Checkpoint>> {
        Ok(self
            .list_checkpoints(execution_id)?
            .into_iter()
            .rev()
            .find(|c| c.step_index == step_index))
    }

    fn list_checkpoints(&self, execution_id: &str) -> anyhow::Result<Vec<Checkpoint>> {
        let path = self.file_for(execution_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&path)?;
        let mut list = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: Checkpoint = serde_json::from_str(&line)
                .with_context(|| format!("{}:{}: bad checkpoint record", path.display(), lineno + 1))?;
            list.push(record);
        }
        sort_by_step(&mut list);
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checkpoint::CheckpointStatus;
    use serde_json::json;

    fn record(exec: &str, step: f64, name: &str) -> Checkpoint {
        Checkpoint::new(
            exec,
            name,
            step,
            json!({"turn": step as u32, "state": "thinking"}),
            json!({"messages": [{"role": "user", "content": [{"type": "text", "text": "hi"}]}]}),
            json!({"nested": {"list": [1, 2, 3], "flag": true}}),
            CheckpointStatus::Success,
        )
    }

    fn exercise(store: &dyn CheckpointStore) {
        store.save_checkpoint(&record("a", 2.0, "turn_2")).unwrap();
        store.save_checkpoint(&record("a", 1.0, "turn_1")).unwrap();
        store.save_checkpoint(&record("a", 1.5, "turn_1_tools")).unwrap();
        store.save_checkpoint(&record("b", 1.0, "other")).unwrap();

        let list = store.list_checkpoints("a").unwrap();
        let steps: Vec<f64> = list.iter().map(|c| c.step_index).collect();
        assert_eq!(steps, vec![1.0, 1.5, 2.0]);

        let loaded = store.load_checkpoint("a", 1.5).unwrap().unwrap();
        assert_eq!(loaded.step_name, "turn_1_tools");
        assert_eq!(loaded.variables, json!({"nested": {"list": [1, 2, 3], "flag": true}}));
        assert!(store.load_checkpoint("a", 3.0).unwrap().is_none());
        assert!(store.list_checkpoints("missing").unwrap().is_empty());
    }

    #[test]
    fn test_in_memory_store() {
        exercise(&InMemoryCheckpointStore::new());
    }

    #[test]
    fn test_jsonl_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlCheckpointStore::new(dir.path().join("checkpoints")).unwrap();
        exercise(&store);
    }

    #[test]
    fn test_jsonl_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonlCheckpointStore::new(dir.path()).unwrap();
            store.save_checkpoint(&record("exec-1", 1.0, "first")).unwrap();
            store.save_checkpoint(&record("exec-1", 1.0, "second")).unwrap();
        }
        let store = JsonlCheckpointStore::new(dir.path()).unwrap();
        assert_eq!(store.list_checkpoints("exec-1").unwrap().len(), 2);
        let loaded = store.load_checkpoint("exec-1", 1.0).unwrap().unwrap();
        assert_eq!(loaded.step_name, "second");
    }
}
